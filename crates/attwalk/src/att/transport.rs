//! Socket abstraction the ATT client runs on
//!
//! The implementation owns the L2CAP fixed channel (CID 4): every `send`
//! carries exactly one ATT PDU and every received buffer handed back to the
//! client is exactly one PDU. Connection progress is reported back by
//! calling [`AttClient::handle_connected`](super::AttClient::handle_connected),
//! [`AttClient::handle_disconnected`](super::AttClient::handle_disconnected)
//! and [`AttClient::handle_pdu`](super::AttClient::handle_pdu) (or the
//! matching `Peripheral` methods) from the thread that owns the link.

use crate::error::TransportError;
use crate::gap::BdAddr;

pub trait AttTransport {
    /// Start connecting to `address`. Completion is reported asynchronously.
    fn connect_to(&mut self, address: BdAddr) -> Result<(), TransportError>;

    /// Send one PDU.
    fn send(&mut self, pdu: &[u8]) -> Result<(), TransportError>;

    /// Close the link.
    fn close(&mut self);
}
