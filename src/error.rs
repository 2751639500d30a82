//! Error types for the dual-role-ble crate.

use thiserror::Error;

use crate::ble::radio::ConnHandle;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the host BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No radio adapter is available or it is disabled.
    #[error("Radio not available or disabled")]
    RadioUnavailable,

    /// The client pool already holds its maximum number of connections.
    #[error("Maximum client connections ({max}) reached")]
    CapacityExceeded {
        /// The configured pool capacity.
        max: usize,
    },

    /// Establishing a link failed (timeout or radio rejection).
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Writing a remote characteristic failed.
    #[error("Write to characteristic {uuid} failed")]
    WriteFailed {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// Subscribing to a remote characteristic failed.
    #[error("Subscribe to characteristic {uuid} failed")]
    SubscribeFailed {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// Reading a remote attribute failed.
    #[error("Read of {uuid} failed")]
    ReadFailed {
        /// The UUID of the attribute.
        uuid: String,
    },

    /// The link was not encrypted after authentication, or an encrypted-only
    /// attribute was accessed over a plain link.
    #[error("Encryption failed on connection {handle}")]
    EncryptionFailed {
        /// The offending connection.
        handle: ConnHandle,
    },

    /// Service not found on the remote device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the remote device or the local tree.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The handle does not belong to any live connection.
    #[error("Unknown connection handle {0}")]
    UnknownConnection(ConnHandle),

    /// Operation requires a connection but the link is down.
    #[error("Not connected")]
    NotConnected,

    /// The radio refused to start advertising.
    #[error("Advertising failed: {reason}")]
    AdvertisingFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The operation is not supported by this radio backend.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure ends the link it happened on.
    ///
    /// Missing services or characteristics leave the link open and idle.
    pub fn is_fatal_for_link(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed { .. } | Self::SubscribeFailed { .. } | Self::EncryptionFailed { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::WriteFailed { uuid: "x".into() }.is_fatal_for_link());
        assert!(Error::SubscribeFailed { uuid: "x".into() }.is_fatal_for_link());
        assert!(Error::EncryptionFailed {
            handle: ConnHandle(1)
        }
        .is_fatal_for_link());
        assert!(!Error::ServiceNotFound { uuid: "x".into() }.is_fatal_for_link());
        assert!(!Error::CharacteristicNotFound { uuid: "x".into() }.is_fatal_for_link());
        assert!(!Error::CapacityExceeded { max: 3 }.is_fatal_for_link());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::CapacityExceeded { max: 3 }.to_string(),
            "Maximum client connections (3) reached"
        );
        assert_eq!(
            Error::EncryptionFailed {
                handle: ConnHandle(7)
            }
            .to_string(),
            "Encryption failed on connection 7"
        );
    }
}
