//! Attribute Protocol (ATT) client
//!
//! The wire codec, the request/response transaction manager and the
//! transport seam it runs on. GATT discovery is layered on top in
//! [`crate::gatt`].

pub mod client;
pub mod codec;
pub mod constants;
pub mod error;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use self::client::{AttClient, AttClientConfig, AttEvent, LinkState};
pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::transport::AttTransport;
pub use self::types::*;
