//! Local GATT attribute tree hosted by the peripheral role.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::radio::CharProperties;
use crate::ble::uuids::{
    PRESENTATION_FORMAT_DESCRIPTOR_UUID, SESSION_CHARACTERISTIC_UUID, SESSION_SERVICE_UUID,
};
use crate::config::ServerConfig;

/// Presentation format code for UTF-8 strings.
pub const FORMAT_UTF8: u8 = 0x19;

/// "unitless" from the Bluetooth assigned numbers.
const UNIT_UNITLESS: u16 = 0x2700;

/// Bluetooth SIG namespace.
const NAMESPACE_BLUETOOTH_SIG: u8 = 0x01;

/// A descriptor attached to a local characteristic.
///
/// The variant is chosen when the descriptor is created and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDescriptor {
    /// Any descriptor stored as raw bytes.
    Generic {
        /// Descriptor UUID.
        uuid: Uuid,
        /// Current value.
        value: Bytes,
    },
    /// Characteristic Presentation Format (0x2904).
    PresentationFormat {
        /// Value format code.
        format: u8,
        /// Base-10 exponent.
        exponent: i8,
        /// Unit assigned number.
        unit: u16,
        /// Namespace of `description`.
        namespace: u8,
        /// Description within the namespace.
        description: u16,
    },
}

impl LocalDescriptor {
    /// Presentation format descriptor with SIG defaults for everything but
    /// the format.
    pub fn presentation_format(format: u8) -> Self {
        Self::PresentationFormat {
            format,
            exponent: 0,
            unit: UNIT_UNITLESS,
            namespace: NAMESPACE_BLUETOOTH_SIG,
            description: 0,
        }
    }

    /// Descriptor UUID.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Generic { uuid, .. } => *uuid,
            Self::PresentationFormat { .. } => PRESENTATION_FORMAT_DESCRIPTOR_UUID,
        }
    }

    /// Attribute value as served over the air.
    pub fn value(&self) -> Bytes {
        match self {
            Self::Generic { value, .. } => value.clone(),
            Self::PresentationFormat {
                format,
                exponent,
                unit,
                namespace,
                description,
            } => {
                let mut buf = Vec::with_capacity(7);
                buf.push(*format);
                buf.push(*exponent as u8);
                buf.extend_from_slice(&unit.to_le_bytes());
                buf.push(*namespace);
                buf.extend_from_slice(&description.to_le_bytes());
                Bytes::from(buf)
            }
        }
    }

    /// Store a value written by a central. Only generic descriptors are
    /// writable; returns false otherwise.
    pub fn set_value(&mut self, new_value: Bytes) -> bool {
        match self {
            Self::Generic { value, .. } => {
                *value = new_value;
                true
            }
            Self::PresentationFormat { .. } => false,
        }
    }
}

/// A characteristic of a local service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Property flags.
    pub properties: CharProperties,
    /// Current value.
    pub value: Bytes,
    /// Attached descriptors.
    pub descriptors: Vec<LocalDescriptor>,
}

impl LocalCharacteristic {
    /// Create a characteristic with an empty value.
    pub fn new(uuid: Uuid, properties: CharProperties) -> Self {
        Self {
            uuid,
            properties,
            value: Bytes::new(),
            descriptors: Vec::new(),
        }
    }

    /// Set the initial value.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Attach a descriptor.
    pub fn with_descriptor(mut self, descriptor: LocalDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Check whether reads need an encrypted link.
    pub fn requires_read_encryption(&self) -> bool {
        self.properties.contains(CharProperties::READ_ENC)
    }

    /// Check whether writes need an encrypted link.
    pub fn requires_write_encryption(&self) -> bool {
        self.properties.contains(CharProperties::WRITE_ENC)
    }

    /// Look up a descriptor.
    pub fn descriptor(&self, uuid: &Uuid) -> Option<&LocalDescriptor> {
        self.descriptors.iter().find(|d| d.uuid() == *uuid)
    }

    /// Look up a descriptor for modification.
    pub fn descriptor_mut(&mut self, uuid: &Uuid) -> Option<&mut LocalDescriptor> {
        self.descriptors.iter_mut().find(|d| d.uuid() == *uuid)
    }
}

/// A primary service hosted locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics, in registration order.
    pub characteristics: Vec<LocalCharacteristic>,
}

impl LocalService {
    /// Create an empty service.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic.
    pub fn with_characteristic(mut self, characteristic: LocalCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Look up a characteristic.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&LocalCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Look up a characteristic for modification.
    pub fn characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut LocalCharacteristic> {
        self.characteristics.iter_mut().find(|c| c.uuid == *uuid)
    }
}

/// Build the session service.
///
/// One characteristic, readable and writable only over an encrypted link,
/// carrying a UTF-8 presentation format descriptor. It can notify only when
/// periodic notifications are enabled.
pub fn session_service(config: &ServerConfig) -> LocalService {
    let mut properties = CharProperties::READ
        | CharProperties::WRITE
        | CharProperties::READ_ENC
        | CharProperties::WRITE_ENC;
    if config.periodic_notify {
        properties |= CharProperties::NOTIFY;
    }

    let characteristic = LocalCharacteristic::new(SESSION_CHARACTERISTIC_UUID, properties)
        .with_value(config.initial_value.clone())
        .with_descriptor(LocalDescriptor::presentation_format(FORMAT_UTF8));

    LocalService::new(SESSION_SERVICE_UUID).with_characteristic(characteristic)
}

/// What a central asked for when it wrote a client configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscriptionIntent {
    /// Unsubscribed.
    #[default]
    None,
    /// Notifications only.
    Notify,
    /// Indications only.
    Indicate,
    /// Notifications and indications.
    Both,
}

impl SubscriptionIntent {
    /// Decode the descriptor value. Unknown bits are ignored.
    pub fn from_value(value: u16) -> Self {
        match value & 0x3 {
            1 => Self::Notify,
            2 => Self::Indicate,
            3 => Self::Both,
            _ => Self::None,
        }
    }

    /// Check whether anything is subscribed.
    pub fn is_subscribed(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for SubscriptionIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "Unsubscribed"),
            Self::Notify => write!(f, "Subscribed to notifications"),
            Self::Indicate => write!(f, "Subscribed to indications"),
            Self::Both => write!(f, "Subscribed to notifications and indications"),
        }
    }
}
