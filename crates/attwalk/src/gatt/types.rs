//! Common types for GATT operations
//!
//! The discovered attribute model: services own characteristics, which own
//! descriptors. Everything here is a plain value; the live model inside
//! [`Peripheral`](super::Peripheral) hands out clones.

use crate::uuid::Uuid;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

bitflags! {
    /// Characteristic properties, first byte of a characteristic declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags! {
    /// Client Characteristic Configuration descriptor value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientConfiguration: u16 {
        const NOTIFICATION = 0x0001;
        const INDICATION = 0x0002;
    }
}

impl ClientConfiguration {
    /// Wire form of the descriptor value
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }
}

/// How a characteristic value is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteType {
    /// Write Request, acknowledged by the server
    #[default]
    WithResponse,
    /// Write Command, never acknowledged
    WithoutResponse,
}

/// A GATT primary service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Service UUID
    pub uuid: Uuid,
    /// Handle of the service declaration
    pub start_handle: u16,
    /// Last handle belonging to this service
    pub end_handle: u16,
    /// Characteristics in ascending handle order
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, start_handle: u16, end_handle: u16) -> Self {
        Self {
            uuid,
            start_handle,
            end_handle,
            characteristics: Vec::new(),
        }
    }

    /// Look up a characteristic by its declaration handle
    pub fn characteristic(&self, handle: u16) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.start_handle == handle)
    }

    pub fn characteristic_by_uuid(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// A GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Declaration handle
    pub start_handle: u16,
    /// Value handle
    pub value_handle: u16,
    /// Last handle before the next declaration, or the service end
    pub end_handle: u16,
    pub properties: CharacteristicProperties,
    /// Descriptors in ascending handle order
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn descriptor(&self, handle: u16) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.handle == handle)
    }

    /// The Client Characteristic Configuration descriptor, once discovered
    pub fn client_configuration(&self) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|d| d.uuid == Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION)
    }
}

/// A GATT characteristic descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// Body of a characteristic declaration attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDeclaration {
    pub properties: CharacteristicProperties,
    pub value_handle: u16,
    pub uuid: Uuid,
}

impl CharacteristicDeclaration {
    /// Parse `[properties][value handle: u16][uuid: 2, 4 or 16 bytes]`.
    pub fn parse(value: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(value);
        let properties = cursor.read_u8().ok()?;
        let value_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let mut uuid = Vec::new();
        cursor.read_to_end(&mut uuid).ok()?;

        Some(Self {
            properties: CharacteristicProperties::from_bits_retain(properties),
            value_handle,
            uuid: Uuid::try_from_slice_le(&uuid)?,
        })
    }
}
