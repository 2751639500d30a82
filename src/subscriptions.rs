//! Client-role subscriptions and notification dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::advertising::Address;
use crate::ble::radio::{ConnHandle, SubscriptionMode};
use crate::ble::uuids::is_keep_alive_characteristic;
use crate::utils::display_value;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Registry shared between discovery and notification dispatch.
pub type SharedRegistry = Arc<RwLock<SubscriptionRegistry>>;

/// An active subscription on a remote characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Peer address.
    pub peer: Address,
    /// Service owning the characteristic.
    pub service: Uuid,
    /// Push mode.
    pub mode: SubscriptionMode,
    /// Whether pushes are currently accepted.
    pub active: bool,
}

/// A push received from a subscribed remote characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNotification {
    /// Client connection it arrived on.
    pub handle: ConnHandle,
    /// Peer address.
    pub peer: Address,
    /// Owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub characteristic: Uuid,
    /// How it was pushed.
    pub mode: SubscriptionMode,
    /// Payload.
    pub payload: Bytes,
    /// When it arrived.
    pub received_at: DateTime<Utc>,
}

impl std::fmt::Display for RemoteNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {}: Service = {}, Characteristic = {}, Value = {}",
            self.mode,
            self.peer,
            self.service,
            self.characteristic,
            display_value(&self.payload)
        )
    }
}

/// What happened to an incoming push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forwarded to listeners.
    Dispatched,
    /// Keep-alive ping, consumed.
    KeepAlive,
    /// No active subscription; dropped.
    Ignored,
}

/// Tracks which remote characteristics we are subscribed to.
pub struct SubscriptionRegistry {
    entries: HashMap<(ConnHandle, Uuid), Subscription>,
    notification_tx: broadcast::Sender<RemoteNotification>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            entries: HashMap::new(),
            notification_tx,
        }
    }

    /// Create an empty registry ready to share.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a subscription, replacing any previous one for the same key.
    pub fn insert(&mut self, handle: ConnHandle, characteristic: Uuid, subscription: Subscription) {
        debug!(
            %handle,
            %characteristic,
            mode = %subscription.mode,
            "Subscription recorded"
        );
        self.entries.insert((handle, characteristic), subscription);
    }

    /// Drop one subscription.
    pub fn remove(&mut self, handle: ConnHandle, characteristic: &Uuid) -> Option<Subscription> {
        self.entries.remove(&(handle, *characteristic))
    }

    /// Drop every subscription of a connection. Returns how many were dropped.
    pub fn remove_connection(&mut self, handle: ConnHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(h, _), _| *h != handle);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(%handle, removed, "Dropped subscriptions");
        }
        removed
    }

    /// Look up a subscription.
    pub fn get(&self, handle: ConnHandle, characteristic: &Uuid) -> Option<&Subscription> {
        self.entries.get(&(handle, *characteristic))
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Receive dispatched notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteNotification> {
        self.notification_tx.subscribe()
    }

    /// Route one push from a remote server.
    ///
    /// Pushes without an active subscription are late arrivals for a link
    /// that has already been torn down and are dropped silently. A single zero
    /// byte on the configuration characteristic is a keep-alive.
    pub fn handle_notification(
        &self,
        handle: ConnHandle,
        characteristic: Uuid,
        payload: &Bytes,
        is_notify: bool,
    ) -> Disposition {
        let subscription = match self.entries.get(&(handle, characteristic)) {
            Some(s) if s.active => s,
            _ => {
                trace!(%handle, %characteristic, "Push without subscription dropped");
                return Disposition::Ignored;
            }
        };

        if is_keep_alive_characteristic(&characteristic) && payload.as_ref() == [0u8] {
            info!("Keep-alive ping from configuration service");
            return Disposition::KeepAlive;
        }

        let notification = RemoteNotification {
            handle,
            peer: subscription.peer,
            service: subscription.service,
            characteristic,
            mode: SubscriptionMode::from_is_notify(is_notify),
            payload: payload.clone(),
            received_at: Utc::now(),
        };
        info!("{}", notification);

        // No receivers is fine.
        let _ = self.notification_tx.send(notification);
        Disposition::Dispatched
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.entries)
            .finish()
    }
}
