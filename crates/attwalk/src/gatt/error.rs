//! Error handling for GATT operations
use crate::att::AttError;
use thiserror::Error;

/// Usage errors of the peripheral API.
///
/// These are raised before anything reaches the wire. A server rejecting a
/// request is not an error here: it shows up as an empty result in the
/// matching [`PeripheralEvent`](super::PeripheralEvent).
#[derive(Debug, Error)]
pub enum GattError {
    #[error("Not connected")]
    NotConnected,

    #[error("Unknown service 0x{0:04x}")]
    UnknownService(u16),

    #[error("Unknown characteristic 0x{0:04x}")]
    UnknownCharacteristic(u16),

    #[error("Unknown descriptor 0x{0:04x}")]
    UnknownDescriptor(u16),

    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    #[error("Value of {len} bytes exceeds the {max} byte limit")]
    ValueTooLong { len: usize, max: usize },

    #[error("ATT error: {0}")]
    Att(#[from] AttError),
}

/// GATT Result type
pub type GattResult<T> = Result<T, GattError>;
