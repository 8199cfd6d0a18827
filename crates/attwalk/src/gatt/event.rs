//! Events reported by a [`Peripheral`](super::Peripheral)

use super::types::{Characteristic, Descriptor, Service};

/// Everything a peripheral reports back to its owner.
///
/// Attribute payloads are snapshots taken when the event was raised; later
/// discovery does not change them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    Connected,
    Disconnected,
    /// A local name from advertising data was accepted
    NameChanged(String),
    /// Service discovery finished; all known services in handle order
    ServicesDiscovered(Vec<Service>),
    CharacteristicsDiscovered(Service),
    DescriptorsDiscovered(Characteristic),
    /// A characteristic value was read, notified or indicated
    ValueUpdated {
        characteristic: Characteristic,
        value: Vec<u8>,
        /// Set for indications
        confirmed: bool,
    },
    DescriptorValueUpdated {
        descriptor: Descriptor,
        value: Vec<u8>,
    },
}
