//! Notification subscription
//!
//! Enabling notifications means writing the characteristic's Client
//! Characteristic Configuration descriptor. When that descriptor has not
//! been discovered yet, the wanted state is parked and descriptor discovery
//! is started; the write goes out once discovery completes.

use super::error::{GattError, GattResult};
use super::peripheral::Peripheral;
use super::types::{Characteristic, CharacteristicProperties, ClientConfiguration};
use crate::att::AttTransport;
use log::{debug, error, warn};

fn configuration(enabled: bool) -> ClientConfiguration {
    if enabled {
        ClientConfiguration::NOTIFICATION
    } else {
        ClientConfiguration::empty()
    }
}

impl<T: AttTransport> Peripheral<T> {
    /// Enable or disable notifications for the characteristic declared at
    /// `characteristic`.
    pub fn set_notification(&mut self, characteristic: u16, enabled: bool) -> GattResult<()> {
        self.ensure_connected()?;
        let (properties, cccd) = {
            let found = self.lookup_characteristic(characteristic)?;
            (
                found.properties,
                found.client_configuration().map(|d| d.handle),
            )
        };

        if !properties.contains(CharacteristicProperties::NOTIFY) {
            warn!(
                "Characteristic 0x{:04x} does not support notifications",
                characteristic
            );
            return Err(GattError::NotSupported("notifications"));
        }

        match cccd {
            Some(handle) => {
                self.pending_notifications.remove(&characteristic);
                self.write_descriptor(handle, &configuration(enabled).to_le_bytes())
            }
            None => {
                debug!(
                    "Looking for the configuration descriptor of 0x{:04x}",
                    characteristic
                );
                self.pending_notifications.insert(characteristic, enabled);
                let result = self.discover_descriptors(characteristic);
                if result.is_err() {
                    self.pending_notifications.remove(&characteristic);
                }
                result
            }
        }
    }

    /// Write a parked notification state now that descriptor discovery for
    /// `characteristic` has finished.
    pub(super) fn resolve_pending_notification(&mut self, characteristic: &Characteristic) {
        let Some(enabled) = self
            .pending_notifications
            .remove(&characteristic.start_handle)
        else {
            return;
        };

        match characteristic.client_configuration() {
            Some(descriptor) => {
                let value = configuration(enabled).to_le_bytes();
                if let Err(e) = self.write_descriptor(descriptor.handle, &value) {
                    error!(
                        "Failed to configure notifications on 0x{:04x}: {}",
                        characteristic.start_handle, e
                    );
                }
            }
            None => warn!(
                "Characteristic 0x{:04x} has no client configuration descriptor",
                characteristic.start_handle
            ),
        }
    }
}
