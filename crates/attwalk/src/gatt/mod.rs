//! GATT (Generic Attribute Profile) client
//!
//! Discovery of a remote attribute table and access to the characteristics
//! and descriptors it contains, layered on the ATT client.

pub mod error;
pub mod event;
mod notify;
pub mod peripheral;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{GattError, GattResult};
pub use event::PeripheralEvent;
pub use peripheral::Peripheral;
pub use types::{
    Characteristic, CharacteristicDeclaration, CharacteristicProperties, ClientConfiguration,
    Descriptor, Service, WriteType,
};
