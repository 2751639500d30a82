//! Peripheral role: the session service and the centrals connected to it.

pub mod gatt;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::advertising::Address;
use crate::ble::callbacks::{CharacteristicCallbacks, DescriptorCallbacks, ServerCallbacks};
use crate::ble::radio::{ConnHandle, ConnectionDescriptor, NotifyStatus, PeripheralRadio};
use crate::ble::uuids::SESSION_CHARACTERISTIC_UUID;
use crate::config::{SecurityConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::utils::display_value;

pub use gatt::{LocalCharacteristic, LocalDescriptor, LocalService, SubscriptionIntent};

/// Lifecycle of an inbound link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Link up, setup still running.
    Connecting,
    /// Ready for attribute access.
    Connected,
    /// Torn down or being torn down; no more access.
    Disconnected,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// A central connected to the local server.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    /// Connection handle.
    pub handle: ConnHandle,
    /// Peer address.
    pub peer: Address,
    /// Current state.
    pub state: PeerState,
    /// Whether the link completed encryption.
    pub encrypted: bool,
    /// What the central subscribed to, per local characteristic.
    pub subscriptions: HashMap<Uuid, SubscriptionIntent>,
    /// When the central connected.
    pub connected_at: DateTime<Utc>,
}

impl ServerConnection {
    fn new(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            handle: descriptor.handle,
            peer: descriptor.peer,
            state: PeerState::Connecting,
            encrypted: descriptor.encrypted,
            subscriptions: HashMap::new(),
            connected_at: Utc::now(),
        }
    }
}

/// Default attribute observer: logs every access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeLogger;

impl CharacteristicCallbacks for AttributeLogger {
    fn on_read(&mut self, characteristic: &LocalCharacteristic, handle: ConnHandle) {
        info!(
            %handle,
            "{}: onRead(), value: {}",
            characteristic.uuid,
            display_value(&characteristic.value)
        );
    }

    fn on_write(&mut self, characteristic: &LocalCharacteristic, handle: ConnHandle) {
        info!(
            %handle,
            "{}: onWrite(), value: {}",
            characteristic.uuid,
            display_value(&characteristic.value)
        );
    }

    fn on_notify(&mut self, _characteristic: &LocalCharacteristic, _value: &mut Vec<u8>) {
        info!("Sending notification to clients");
    }

    fn on_status(&mut self, characteristic: &LocalCharacteristic, status: NotifyStatus, code: i32) {
        if status.is_success() {
            debug!(uuid = %characteristic.uuid, ?status, code, "Notification/Indication status");
        } else {
            warn!(uuid = %characteristic.uuid, ?status, code, "Notification/Indication status");
        }
    }

    fn on_subscribe(
        &mut self,
        characteristic: &LocalCharacteristic,
        handle: ConnHandle,
        peer: Address,
        intent: SubscriptionIntent,
    ) {
        info!(
            "Client ID: {} Address: {} {} {}",
            handle, peer, intent, characteristic.uuid
        );
    }
}

impl DescriptorCallbacks for AttributeLogger {
    fn on_read(&mut self, descriptor: &LocalDescriptor) {
        info!("{} Descriptor read", descriptor.uuid());
    }

    fn on_write(&mut self, descriptor: &LocalDescriptor) {
        info!(
            "Descriptor written value: {}",
            display_value(&descriptor.value())
        );
    }
}

/// Hosts the session service for any number of centrals.
pub struct PeripheralServer<P: PeripheralRadio> {
    radio: Arc<P>,
    config: ServerConfig,
    service: LocalService,
    peers: HashMap<ConnHandle, ServerConnection>,
    characteristic_callbacks: Box<dyn CharacteristicCallbacks>,
    descriptor_callbacks: Box<dyn DescriptorCallbacks>,
}

impl<P: PeripheralRadio> PeripheralServer<P> {
    /// Create a server hosting the session service.
    pub fn new(radio: Arc<P>, config: ServerConfig) -> Self {
        let service = gatt::session_service(&config);
        Self::with_service(radio, config, service)
    }

    /// Create a server hosting an arbitrary service.
    pub fn with_service(radio: Arc<P>, config: ServerConfig, service: LocalService) -> Self {
        Self {
            radio,
            config,
            service,
            peers: HashMap::new(),
            characteristic_callbacks: Box::new(AttributeLogger),
            descriptor_callbacks: Box::new(AttributeLogger),
        }
    }

    /// Replace the characteristic observer.
    pub fn set_characteristic_callbacks(
        &mut self,
        callbacks: impl CharacteristicCallbacks + 'static,
    ) {
        self.characteristic_callbacks = Box::new(callbacks);
    }

    /// Replace the descriptor observer.
    pub fn set_descriptor_callbacks(&mut self, callbacks: impl DescriptorCallbacks + 'static) {
        self.descriptor_callbacks = Box::new(callbacks);
    }

    /// Register the service and start advertising it.
    /// Hand the pairing requirements to the stack.
    ///
    /// Must run before the service is registered so the first central already
    /// pairs under them.
    pub async fn configure_security(&mut self, security: &SecurityConfig) -> Result<()> {
        debug!(
            bonding = security.bonding,
            mitm = security.mitm,
            secure_connections = security.secure_connections,
            "Configuring pairing"
        );
        self.radio.configure_security(security).await
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Creating session server");
        self.radio.register_service(&self.service).await?;
        self.advertise().await?;
        info!("Advertising Started");
        Ok(())
    }

    async fn advertise(&mut self) -> Result<()> {
        self.radio
            .start_advertising(&[self.service.uuid], self.config.scan_response)
            .await
            .map_err(|e| Error::AdvertisingFailed {
                reason: e.to_string(),
            })
    }

    /// Serve a read of a local characteristic.
    ///
    /// Refused for unknown or torn-down links. An encryption-gated read over
    /// a plain link disconnects the central.
    pub async fn on_read(&mut self, handle: ConnHandle, uuid: Uuid) -> Result<Bytes> {
        let encrypted = self.live_peer(handle)?.encrypted;
        let characteristic = self
            .service
            .characteristic(&uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;

        if !characteristic.properties.can_read() {
            return Err(Error::NotSupported {
                operation: format!("read of {}", uuid),
            });
        }
        if characteristic.requires_read_encryption() && !encrypted {
            self.reject(handle).await?;
            return Err(Error::EncryptionFailed { handle });
        }

        self.characteristic_callbacks.on_read(characteristic, handle);
        Ok(characteristic.value.clone())
    }

    /// Apply a write to a local characteristic.
    ///
    /// Same refusal rules as [`on_read`](Self::on_read).
    pub async fn on_write(&mut self, handle: ConnHandle, uuid: Uuid, value: Bytes) -> Result<()> {
        let encrypted = self.live_peer(handle)?.encrypted;
        let characteristic = self
            .service
            .characteristic(&uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;

        if !characteristic.properties.can_write() {
            return Err(Error::NotSupported {
                operation: format!("write of {}", uuid),
            });
        }
        if characteristic.requires_write_encryption() && !encrypted {
            self.reject(handle).await?;
            return Err(Error::EncryptionFailed { handle });
        }

        let characteristic = self
            .service
            .characteristic_mut(&uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;
        characteristic.value = value;
        self.characteristic_callbacks.on_write(characteristic, handle);
        Ok(())
    }

    /// Serve a descriptor read.
    pub fn on_descriptor_read(
        &mut self,
        handle: ConnHandle,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Bytes> {
        self.live_peer(handle)?;
        let descriptor = self
            .service
            .characteristic(&characteristic)
            .and_then(|c| c.descriptor(&descriptor))
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: descriptor.to_string(),
            })?;

        self.descriptor_callbacks.on_read(descriptor);
        Ok(descriptor.value())
    }

    /// Apply a descriptor write.
    pub fn on_descriptor_write(
        &mut self,
        handle: ConnHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) -> Result<()> {
        self.live_peer(handle)?;
        let target = self
            .service
            .characteristic_mut(&characteristic)
            .and_then(|c| c.descriptor_mut(&descriptor))
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: descriptor.to_string(),
            })?;

        if !target.set_value(value) {
            return Err(Error::NotSupported {
                operation: format!("write of descriptor {}", descriptor),
            });
        }
        self.descriptor_callbacks.on_write(target);
        Ok(())
    }

    /// Delivery status of a notification or indication.
    pub fn on_status(&mut self, uuid: Uuid, status: NotifyStatus, code: i32) {
        match self.service.characteristic(&uuid) {
            Some(characteristic) => {
                self.characteristic_callbacks
                    .on_status(characteristic, status, code)
            }
            None => debug!(%uuid, ?status, code, "Status for unknown characteristic"),
        }
    }

    /// A central wrote its client configuration descriptor.
    pub fn on_subscribe(&mut self, handle: ConnHandle, peer: Address, uuid: Uuid, value: u16) {
        let intent = SubscriptionIntent::from_value(value);

        if let Some(connection) = self.peers.get_mut(&handle) {
            connection.subscriptions.insert(uuid, intent);
        }

        match self.service.characteristic(&uuid) {
            Some(characteristic) => {
                self.characteristic_callbacks
                    .on_subscribe(characteristic, handle, peer, intent)
            }
            None => debug!(%uuid, %intent, "Subscribe on unknown characteristic"),
        }
    }

    /// Push the session characteristic to subscribed centrals.
    ///
    /// Does nothing unless periodic notifications are enabled and a central
    /// is connected. Returns whether a notification was sent.
    pub async fn notify_tick(&mut self) -> Result<bool> {
        if !self.config.periodic_notify || self.connected_count() == 0 {
            return Ok(false);
        }

        let characteristic = self
            .service
            .characteristic_mut(&SESSION_CHARACTERISTIC_UUID)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: SESSION_CHARACTERISTIC_UUID.to_string(),
            })?;

        let mut value = characteristic.value.to_vec();
        self.characteristic_callbacks
            .on_notify(characteristic, &mut value);
        characteristic.value = Bytes::from(value);

        let uuid = characteristic.uuid;
        let value = characteristic.value.clone();
        self.radio.notify(uuid, &value).await?;
        Ok(true)
    }

    /// Replace the value of a local characteristic.
    pub fn set_value(&mut self, uuid: Uuid, value: impl Into<Bytes>) -> Result<()> {
        let characteristic = self
            .service
            .characteristic_mut(&uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;
        characteristic.value = value.into();
        Ok(())
    }

    /// Record that an inbound link completed encryption.
    pub fn mark_encrypted(&mut self, handle: ConnHandle) -> Result<()> {
        let connection = self
            .peers
            .get_mut(&handle)
            .ok_or(Error::UnknownConnection(handle))?;
        connection.encrypted = true;
        Ok(())
    }

    /// Stop serving a central and disconnect it.
    pub async fn reject(&mut self, handle: ConnHandle) -> Result<()> {
        if let Some(connection) = self.peers.get_mut(&handle) {
            connection.state = PeerState::Disconnected;
        }
        warn!(%handle, "Encrypt connection failed - disconnecting client");
        self.radio.disconnect(handle).await
    }

    fn live_peer(&self, handle: ConnHandle) -> Result<&ServerConnection> {
        match self.peers.get(&handle) {
            Some(connection) if connection.state == PeerState::Connected => Ok(connection),
            Some(_) => Err(Error::NotConnected),
            None => Err(Error::UnknownConnection(handle)),
        }
    }

    /// Look up a connected central.
    pub fn peer(&self, handle: ConnHandle) -> Option<&ServerConnection> {
        self.peers.get(&handle)
    }

    /// Number of centrals ready for attribute access.
    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    /// The hosted service.
    pub fn service(&self) -> &LocalService {
        &self.service
    }
}

#[async_trait]
impl<P: PeripheralRadio> ServerCallbacks for PeripheralServer<P> {
    async fn on_connect(&mut self, descriptor: ConnectionDescriptor) {
        let handle = descriptor.handle;
        info!("Client address: {}", descriptor.peer);
        self.peers.insert(handle, ServerConnection::new(&descriptor));

        if self.config.multi_connect {
            info!("Multi-connect support: start advertising");
            if let Err(e) = self.advertise().await {
                warn!("{}", e);
            }
        }

        let preferred = self.config.preferred_params;
        if let Err(e) = self.radio.update_conn_params(handle, &preferred).await {
            warn!(%handle, "Failed to request {}: {}", preferred, e);
        }

        if let Some(connection) = self.peers.get_mut(&handle) {
            connection.state = PeerState::Connected;
        }
    }

    async fn on_disconnect(&mut self, handle: ConnHandle) {
        self.peers.remove(&handle);
        info!(%handle, "Client disconnected - start advertising");
        if let Err(e) = self.advertise().await {
            warn!("{}", e);
        }
    }
}
