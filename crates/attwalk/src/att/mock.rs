//! In-memory transport for tests

use super::transport::AttTransport;
use crate::error::TransportError;
use crate::gap::BdAddr;

/// Records everything the client sends; tests play the remote server.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    pub connects: Vec<BdAddr>,
    pub closed: bool,
    /// Makes every `send` fail with `Closed`
    pub fail_sends: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the PDUs sent so far
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(Vec::as_slice)
    }
}

impl AttTransport for MockTransport {
    fn connect_to(&mut self, address: BdAddr) -> Result<(), TransportError> {
        self.connects.push(address);
        self.closed = false;
        Ok(())
    }

    fn send(&mut self, pdu: &[u8]) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Closed);
        }
        self.sent.push(pdu.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
