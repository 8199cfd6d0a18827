//! Error types for the attwalk library
//!
//! Errors raised by the byte-stream socket that carries ATT PDUs.

use thiserror::Error;

/// Errors reported by an [`AttTransport`](crate::att::AttTransport)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Socket has been closed")]
    Closed,
}
