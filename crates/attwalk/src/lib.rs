//! attwalk - a Bluetooth Low Energy ATT client and GATT discovery engine
//!
//! This library speaks the Attribute Protocol over a caller-supplied
//! transport and walks a remote device's attribute table to build a model
//! of its services, characteristics and descriptors. It also parses
//! advertising data gathered before a connection exists.
//!
//! Everything is single-threaded and event driven: the owner of the
//! transport feeds link events and received PDUs into a
//! [`Peripheral`](gatt::Peripheral) and drains the resulting
//! [`PeripheralEvent`](gatt::PeripheralEvent)s.

pub mod att;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttClient, AttClientConfig, AttError, AttEvent, AttTransport, LinkState};
pub use error::TransportError;
pub use gap::{AdvertisingData, BdAddr};
pub use gatt::{
    Characteristic, CharacteristicProperties, Descriptor, GattError, Peripheral, PeripheralEvent,
    Service, WriteType,
};
pub use uuid::Uuid;
