//! EIR / advertising data parsing
//!
//! Advertising data is a sequence of `[length][type][data; length - 1]`
//! structures. A zero length ends the significant part of the block.

use super::constants::*;
use crate::uuid::Uuid;
use log::{debug, warn};
use std::collections::HashSet;

/// Split an advertising block into `(type, data)` structures.
///
/// Stops at the first structure whose declared length runs past the end of
/// the buffer, keeping everything before it.
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 {
            break;
        }
        if i + length >= data.len() {
            warn!(
                "Truncated advertising structure at offset {} ({} bytes declared, {} left)",
                i,
                length,
                data.len() - i - 1
            );
            break;
        }

        result.push((data[i + 1], &data[i + 2..i + 1 + length]));
        i += 1 + length;
    }

    result
}

/// What a peripheral has told us about itself before connecting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingData {
    pub name: Option<String>,
    /// Whether `name` came from a Complete Local Name structure
    pub complete_name: bool,
    /// Advertised service UUIDs, complete and incomplete lists merged
    pub service_uuids: HashSet<Uuid>,
    pub flags: Option<u8>,
}

impl AdvertisingData {
    /// Merge one advertising block.
    ///
    /// Returns every name that was accepted, in order. A complete name
    /// always replaces the current one; a shortened name only does while no
    /// complete name has been seen.
    pub fn merge(&mut self, data: &[u8]) -> Vec<String> {
        let mut names = Vec::new();

        for (ad_type, payload) in parse_advertising_data(data) {
            match ad_type {
                ADV_TYPE_FLAGS => self.flags = payload.first().copied(),
                ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE => {
                    self.merge_uuids(2, payload)
                }
                ADV_TYPE_32BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_32BIT_SERVICE_UUID_COMPLETE => {
                    self.merge_uuids(4, payload)
                }
                ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE => {
                    self.merge_uuids(16, payload)
                }
                ADV_TYPE_SHORT_LOCAL_NAME | ADV_TYPE_COMPLETE_LOCAL_NAME => {
                    let complete = ad_type == ADV_TYPE_COMPLETE_LOCAL_NAME;
                    if complete || !self.complete_name {
                        let name = String::from_utf8_lossy(payload).into_owned();
                        self.name = Some(name.clone());
                        self.complete_name = complete;
                        names.push(name);
                    }
                }
                ADV_TYPE_TX_POWER_LEVEL | ADV_TYPE_SOLICITED_128BIT_SERVICE_UUIDS => {
                    debug!("Unhandled advertising data type 0x{:02x}", ad_type);
                }
                _ => warn!("Unknown advertising data type 0x{:02x}", ad_type),
            }
        }

        names
    }

    fn merge_uuids(&mut self, width: usize, payload: &[u8]) {
        let chunks = payload.chunks_exact(width);
        if !chunks.remainder().is_empty() {
            warn!(
                "Ignoring {} trailing bytes in {}-bit UUID list",
                chunks.remainder().len(),
                width * 8
            );
        }
        self.service_uuids
            .extend(chunks.filter_map(Uuid::try_from_slice_le));
    }
}
