//! Connection slots.
//!
//! A [`ClientConnection`] is one entry of the client pool. It outlives the
//! radio link it tracks: after a disconnect the slot goes back to
//! [`ConnectionState::Idle`] and can be re-targeted.

use std::time::Instant;

use crate::ble::advertising::{AdvertisedDevice, Address};
use crate::ble::params::ConnectionParams;
use crate::ble::radio::{ConnHandle, RemoteCharacteristic};

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link.
    #[default]
    Idle,
    /// Currently attempting to connect.
    Connecting,
    /// Link established.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// One client-role connection slot.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Radio handle while the link is live.
    pub handle: Option<ConnHandle>,
    /// The advertiser this slot targets.
    pub device: AdvertisedDevice,
    /// Current state.
    pub state: ConnectionState,
    /// Parameters last requested for the link.
    pub params: ConnectionParams,
    /// Whether the link completed encryption.
    pub encrypted: bool,
    /// Signal strength sampled right after connecting.
    pub rssi_at_connect: Option<i16>,
    /// Configuration characteristic found by discovery.
    pub characteristic: Option<RemoteCharacteristic>,
    /// When the current link came up.
    pub connected_at: Option<Instant>,
}

impl ClientConnection {
    /// Create an idle slot targeting `device`.
    pub fn new(device: AdvertisedDevice, params: ConnectionParams) -> Self {
        Self {
            handle: None,
            device,
            state: ConnectionState::Idle,
            params,
            encrypted: false,
            rssi_at_connect: None,
            characteristic: None,
            connected_at: None,
        }
    }

    /// Peer address.
    pub fn address(&self) -> Address {
        self.device.address
    }

    /// Check if the link is up.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Check if the slot can be re-targeted.
    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Idle
    }

    /// Point the slot at another advertiser. Clears everything learned from
    /// the previous peer.
    pub fn retarget(&mut self, device: AdvertisedDevice) {
        self.device = device;
        self.reset_link();
    }

    /// Record a live link.
    pub fn mark_connected(&mut self, handle: ConnHandle, rssi: Option<i16>) {
        self.handle = Some(handle);
        self.state = ConnectionState::Connected;
        self.rssi_at_connect = rssi;
        self.connected_at = Some(Instant::now());
    }

    /// Forget the link and go back to idle.
    pub fn reset_link(&mut self) {
        self.handle = None;
        self.state = ConnectionState::Idle;
        self.encrypted = false;
        self.rssi_at_connect = None;
        self.characteristic = None;
        self.connected_at = None;
    }
}
