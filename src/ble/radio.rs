//! Interface to the radio stack.
//!
//! The link layer, GATT transport and pairing cryptography live behind these
//! traits. The core issues commands through [`CentralRadio`] and
//! [`PeripheralRadio`] and receives everything else as [`RadioEvent`]s.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::ble::advertising::{Address, AdvertisedDevice};
use crate::ble::params::ConnectionParams;
use crate::config::{ScanConfig, SecurityConfig};
use crate::error::Result;
use crate::server::gatt::LocalService;

/// Radio-assigned connection handle, unique while the link is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnHandle(pub u16);

impl std::fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the link the local node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// We initiated the link (GATT client).
    Central,
    /// A remote central connected to us (GATT server).
    Peripheral,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Central => write!(f, "central"),
            Self::Peripheral => write!(f, "peripheral"),
        }
    }
}

/// Push delivery mode of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscriptionMode {
    /// Unacknowledged notifications.
    Notify,
    /// Indications, acknowledged at the radio layer.
    Indicate,
}

impl SubscriptionMode {
    /// Mode from the radio's `is_notify` flag.
    pub fn from_is_notify(is_notify: bool) -> Self {
        if is_notify {
            Self::Notify
        } else {
            Self::Indicate
        }
    }
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notify => write!(f, "Notification"),
            Self::Indicate => write!(f, "Indication"),
        }
    }
}

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CharProperties(u16);

impl CharProperties {
    /// No properties.
    pub const NONE: Self = Self(0);
    /// Readable.
    pub const READ: Self = Self(1 << 0);
    /// Writable with response.
    pub const WRITE: Self = Self(1 << 1);
    /// Writable without response.
    pub const WRITE_NO_RESPONSE: Self = Self(1 << 2);
    /// Supports notifications.
    pub const NOTIFY: Self = Self(1 << 3);
    /// Supports indications.
    pub const INDICATE: Self = Self(1 << 4);
    /// Reads require an encrypted link.
    pub const READ_ENC: Self = Self(1 << 5);
    /// Writes require an encrypted link.
    pub const WRITE_ENC: Self = Self(1 << 6);

    /// Raw bit representation.
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Check whether every flag in `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether the attribute can be read.
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    /// Check whether the attribute can be written, with or without response.
    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE) || self.contains(Self::WRITE_NO_RESPONSE)
    }

    /// Check whether notifications are supported.
    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    /// Check whether indications are supported.
    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

impl std::ops::BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CharProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A characteristic found on a remote GATT server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Property flags.
    pub properties: CharProperties,
    /// UUIDs of the attached descriptors.
    pub descriptors: Vec<Uuid>,
}

impl RemoteCharacteristic {
    /// Check whether a descriptor is attached.
    pub fn has_descriptor(&self, uuid: &Uuid) -> bool {
        self.descriptors.contains(uuid)
    }
}

/// A primary service found on a remote GATT server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<RemoteCharacteristic>,
}

impl RemoteService {
    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&RemoteCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Connection descriptor delivered with connect and authentication events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// The connection handle.
    pub handle: ConnHandle,
    /// Over-the-air address of the peer.
    pub peer: Address,
    /// Our role on this link.
    pub role: Role,
    /// Whether the link is encrypted.
    pub encrypted: bool,
}

/// Delivery status of a notification or indication previously sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    /// Notification handed to the link layer.
    SuccessNotify,
    /// Indication acknowledged by the peer.
    SuccessIndicate,
    /// Peer has indications disabled.
    ErrorIndicateDisabled,
    /// Peer has notifications disabled.
    ErrorNotifyDisabled,
    /// GATT layer failure.
    ErrorGatt,
    /// No subscribed client.
    ErrorNoClient,
    /// Indication not acknowledged in time.
    ErrorIndicateTimeout,
    /// Indication rejected.
    ErrorIndicateFailure,
}

impl NotifyStatus {
    /// Check whether the value reached the radio successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessNotify | Self::SuccessIndicate)
    }
}

/// Events delivered by the radio stack.
///
/// Events that need an answer carry a `oneshot` reply channel; dropping the
/// sender without replying lets the radio fall back to its default.
#[derive(Debug)]
pub enum RadioEvent {
    /// An advertisement was received while scanning.
    AdvertisementReport(AdvertisedDevice),
    /// The scan window closed.
    ScanEnded,
    /// A client-role link went down.
    ClientDisconnected {
        /// The connection handle.
        handle: ConnHandle,
    },
    /// A remote server asked to change the connection parameters.
    ParamsUpdateRequest {
        /// The connection handle.
        handle: ConnHandle,
        /// The proposal.
        params: ConnectionParams,
        /// Accept (`true`) or reject.
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Pairing/encryption finished on a link of either role.
    AuthenticationComplete(ConnectionDescriptor),
    /// The stack needs the passkey to display or send.
    PasskeyRequest {
        /// Passkey reply.
        reply: oneshot::Sender<u32>,
    },
    /// Numeric comparison: confirm the passkey shown on both sides.
    ConfirmPasskey {
        /// The passkey to confirm.
        passkey: u32,
        /// Whether the passkeys match.
        reply: oneshot::Sender<bool>,
    },
    /// A remote central connected to our server.
    PeerConnected(ConnectionDescriptor),
    /// A remote central disconnected from our server.
    PeerDisconnected {
        /// The connection handle.
        handle: ConnHandle,
    },
    /// A remote central reads a local characteristic.
    CharacteristicRead {
        /// The connection handle.
        handle: ConnHandle,
        /// The characteristic UUID.
        characteristic: Uuid,
        /// Value to return, or `None` to refuse.
        reply: Option<oneshot::Sender<Option<Bytes>>>,
    },
    /// A remote central wrote a local characteristic.
    CharacteristicWrite {
        /// The connection handle.
        handle: ConnHandle,
        /// The characteristic UUID.
        characteristic: Uuid,
        /// Written value.
        value: Bytes,
    },
    /// A remote central reads a local descriptor.
    DescriptorRead {
        /// The connection handle.
        handle: ConnHandle,
        /// Owning characteristic.
        characteristic: Uuid,
        /// The descriptor UUID.
        descriptor: Uuid,
    },
    /// A remote central wrote a local descriptor.
    DescriptorWrite {
        /// The connection handle.
        handle: ConnHandle,
        /// Owning characteristic.
        characteristic: Uuid,
        /// The descriptor UUID.
        descriptor: Uuid,
        /// Written value.
        value: Bytes,
    },
    /// Outcome of a notification/indication we sent.
    NotifyStatus {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// Delivery status.
        status: NotifyStatus,
        /// Host stack return code.
        code: i32,
    },
    /// A remote central changed its CCCD on a local characteristic.
    SubscribeChanged {
        /// The connection handle.
        handle: ConnHandle,
        /// Peer address.
        peer: Address,
        /// The characteristic UUID.
        characteristic: Uuid,
        /// 0 = off, 1 = notify, 2 = indicate, 3 = both.
        value: u16,
    },
    /// A remote server pushed a value we subscribed to.
    RemoteNotification {
        /// The connection handle.
        handle: ConnHandle,
        /// The characteristic UUID.
        characteristic: Uuid,
        /// Payload.
        value: Bytes,
        /// Notification (`true`) or indication.
        is_notify: bool,
    },
}

/// Client-role commands.
///
/// `connect` and the attribute operations complete (or fail) before
/// returning; per-operation timeouts belong to the radio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CentralRadio: Send + Sync {
    /// Start scanning. A zero duration scans until stopped.
    async fn start_scan(&self, config: &ScanConfig) -> Result<()>;

    /// Stop an active scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to an advertiser. `refresh_cache = false` reuses the service
    /// database learned on a previous connection.
    async fn connect(
        &self,
        device: &AdvertisedDevice,
        params: &ConnectionParams,
        refresh_cache: bool,
    ) -> Result<ConnHandle>;

    /// Tear down a client link.
    async fn disconnect(&self, handle: ConnHandle) -> Result<()>;

    /// Request new parameters on a client link.
    async fn update_conn_params(&self, handle: ConnHandle, params: &ConnectionParams) -> Result<()>;

    /// Current signal strength of a link.
    async fn rssi(&self, handle: ConnHandle) -> Option<i16>;

    /// Look up a primary service on the peer.
    async fn discover_service(
        &self,
        handle: ConnHandle,
        uuid: Uuid,
    ) -> Result<Option<RemoteService>>;

    /// Read a remote characteristic.
    async fn read(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Bytes>;

    /// Read a descriptor attached to a remote characteristic.
    async fn read_descriptor(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        descriptor: Uuid,
    ) -> Result<Bytes>;

    /// Write a remote characteristic.
    async fn write(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        value: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Enable notifications or indications on a remote characteristic.
    async fn subscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        mode: SubscriptionMode,
    ) -> Result<()>;

    /// Disable pushes from a remote characteristic.
    async fn unsubscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<()>;
}

/// Server-role commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeripheralRadio: Send + Sync {
    /// Set the pairing requirements the stack negotiates with: bonding,
    /// MITM protection and LE Secure Connections.
    async fn configure_security(&self, config: &SecurityConfig) -> Result<()>;

    /// Create the service, its characteristics and descriptors, and start it.
    async fn register_service(&self, service: &LocalService) -> Result<()>;

    /// Start (or resume) advertising the given services.
    async fn start_advertising(&self, service_uuids: &[Uuid], scan_response: bool) -> Result<()>;

    /// Tear down an inbound link.
    async fn disconnect(&self, handle: ConnHandle) -> Result<()>;

    /// Request new parameters on an inbound link.
    async fn update_conn_params(&self, handle: ConnHandle, params: &ConnectionParams) -> Result<()>;

    /// Push a value to every subscribed central.
    async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;
}
