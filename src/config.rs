//! Node configuration.
//!
//! Defaults reproduce the reference tuning of the firmware; every knob can be
//! overridden with the `with_*` setters or, with the `serde` feature, loaded
//! from any serde format.

use std::time::Duration;

use crate::ble::params::{ConnectionParams, ParamBounds};

/// Scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// How long one scan window lasts. Zero scans until stopped.
    pub duration: Duration,
    /// How often to scan, in milliseconds.
    pub interval_ms: u16,
    /// How long each scan lasts within an interval, in milliseconds.
    pub window_ms: u16,
    /// Request scan responses. Costs energy on both sides.
    pub active: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            interval_ms: 45,
            window_ms: 15,
            active: true,
        }
    }
}

/// Client-role settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Maximum simultaneous client connections.
    pub max_connections: usize,
    /// How long to wait for a connection to complete.
    pub connect_timeout: Duration,
    /// Parameters a new client connects with.
    pub initial_params: ConnectionParams,
    /// Parameters applied once connected.
    pub relaxed_params: ConnectionParams,
    /// Payload written to the remote configuration characteristic.
    pub write_payload: Vec<u8>,
    /// Whether that write asks for a response.
    pub write_with_response: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 3,
            connect_timeout: Duration::from_secs(5),
            initial_params: ConnectionParams::INITIAL_CLIENT,
            relaxed_params: ConnectionParams::RELAXED_CLIENT,
            write_payload: b"No tip!".to_vec(),
            write_with_response: true,
        }
    }
}

/// Server-role settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Resume advertising as soon as a central connects.
    pub multi_connect: bool,
    /// Parameters requested from each inbound central.
    pub preferred_params: ConnectionParams,
    /// Initial value of the session characteristic.
    pub initial_value: Vec<u8>,
    /// Include a scan response in advertising.
    pub scan_response: bool,
    /// Periodically notify connected centrals.
    pub periodic_notify: bool,
    /// Minimum time between two notification ticks.
    pub notify_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            multi_connect: true,
            preferred_params: ConnectionParams::SERVER_PREFERRED,
            initial_value: b"Burger".to_vec(),
            scan_response: true,
            periodic_notify: false,
            notify_period: Duration::from_millis(100),
        }
    }
}

/// Pairing behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecurityConfig {
    /// Passkey handed to the stack on request.
    pub passkey: u32,
    /// Answer to numeric-comparison prompts.
    pub accept_numeric_comparison: bool,
    /// Store keys for reconnection.
    pub bonding: bool,
    /// Require man-in-the-middle protection.
    pub mitm: bool,
    /// Use LE Secure Connections.
    pub secure_connections: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            passkey: 123_456,
            accept_numeric_comparison: true,
            bonding: false,
            mitm: false,
            secure_connections: true,
        }
    }
}

/// Full node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeConfig {
    /// GAP device name.
    pub device_name: String,
    /// Scanner settings.
    pub scan: ScanConfig,
    /// Client-role settings.
    pub client: ClientConfig,
    /// Server-role settings.
    pub server: ServerConfig,
    /// Pairing behaviour.
    pub security: SecurityConfig,
    /// Acceptance bounds for peer parameter-update requests.
    pub param_bounds: ParamBounds,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_name: "Test BLE".to_string(),
            scan: ScanConfig::default(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            param_bounds: ParamBounds::default(),
        }
    }
}

impl NodeConfig {
    /// Set the device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the client pool capacity.
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.client.max_connections = max;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.client.connect_timeout = timeout;
        self
    }

    /// Enable periodic notifications at the given period.
    pub fn with_periodic_notify(mut self, period: Duration) -> Self {
        self.server.periodic_notify = true;
        self.server.notify_period = period;
        self
    }

    /// Set the scan window duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan.duration = duration;
        self
    }

    /// Set whether the radio can host several centrals at once.
    pub fn with_multi_connect(mut self, enabled: bool) -> Self {
        self.server.multi_connect = enabled;
        self
    }
}
