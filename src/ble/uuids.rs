//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Identities are fixed at build time; nothing here is negotiated at runtime.

use uuid::Uuid;

/// Bluetooth base UUID, used to expand 16-bit assigned numbers.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

// Configuration Service (client role target)
/// Service the central scans for and connects to.
pub const CONFIGURATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x5ab457fd_fbad_475b_97a0_29900940a47b);
/// Characteristic read, written and subscribed on the remote configuration service.
pub const CONFIGURATION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7f2d2a4e_ba58_4e8f_8b96_6c8bdcba629e);

// Session Service (server role)
/// Service hosted and advertised by the local peripheral.
pub const SESSION_SERVICE_UUID: Uuid = Uuid::from_u128(0x176a2a43_0f84_4036_898a_768348a9ec3b);
/// Encrypted read/write characteristic of the session service.
pub const SESSION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x78931a77_8177_4679_844a_89bfe2bd0fa9);

// Descriptors
/// Companion descriptor read once during discovery when the peer exposes it.
pub const COMPANION_DESCRIPTOR_UUID: Uuid = uuid_from_u16(0xc01d);
/// Characteristic Presentation Format descriptor.
pub const PRESENTATION_FORMAT_DESCRIPTOR_UUID: Uuid = uuid_from_u16(0x2904);

/// Check if a characteristic carries keep-alive pings.
pub fn is_keep_alive_characteristic(uuid: &Uuid) -> bool {
    *uuid == CONFIGURATION_CHARACTERISTIC_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            CONFIGURATION_SERVICE_UUID.to_string(),
            "5ab457fd-fbad-475b-97a0-29900940a47b"
        );
        assert_eq!(
            SESSION_CHARACTERISTIC_UUID.to_string(),
            "78931a77-8177-4679-844a-89bfe2bd0fa9"
        );
    }

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            PRESENTATION_FORMAT_DESCRIPTOR_UUID.to_string(),
            "00002904-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            COMPANION_DESCRIPTOR_UUID.to_string(),
            "0000c01d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_is_keep_alive_characteristic() {
        assert!(is_keep_alive_characteristic(&CONFIGURATION_CHARACTERISTIC_UUID));
        assert!(!is_keep_alive_characteristic(&SESSION_CHARACTERISTIC_UUID));
    }
}
