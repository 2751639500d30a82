//! Bounded pool of client-role connections.
//!
//! Slots are kept after their link drops so a returning peer reconnects
//! without refreshing its service database, and idle slots are recycled for
//! new peers before new ones are created.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::advertising::AdvertisedDevice;
use crate::ble::callbacks::ClientCallbacks;
use crate::ble::connection::{ClientConnection, ConnectionState};
use crate::ble::params::{ConnectionParameterNegotiator, ConnectionParams};
use crate::ble::radio::{CentralRadio, ConnHandle};
use crate::ble::scanner::Scanner;
use crate::config::ClientConfig;
use crate::discovery::{DiscoveryReport, ServiceDiscoveryAgent};
use crate::error::{Error, Result};
use crate::subscriptions::SharedRegistry;

/// Client-role connections, at most `max_connections` of them.
pub struct ClientConnectionPool<C: CentralRadio> {
    central: Arc<C>,
    config: ClientConfig,
    slots: Vec<ClientConnection>,
    scanner: Scanner<C>,
    agent: ServiceDiscoveryAgent<C>,
    registry: SharedRegistry,
    negotiator: ConnectionParameterNegotiator,
    last_report: Option<DiscoveryReport>,
}

impl<C: CentralRadio> ClientConnectionPool<C> {
    /// Create an empty pool.
    pub fn new(
        central: Arc<C>,
        config: ClientConfig,
        scanner: Scanner<C>,
        registry: SharedRegistry,
        negotiator: ConnectionParameterNegotiator,
    ) -> Self {
        let agent = ServiceDiscoveryAgent::new(central.clone(), registry.clone(), &config);
        Self {
            central,
            config,
            slots: Vec::new(),
            scanner,
            agent,
            registry,
            negotiator,
            last_report: None,
        }
    }

    /// Connect to `device`, reusing a slot when possible.
    ///
    /// A slot already tracking the address is preferred; a connected one is
    /// returned as is. Otherwise the first idle slot is re-targeted, and only
    /// then is a new slot created. A freshly created slot that fails to
    /// connect is removed again.
    pub async fn connect_or_reuse(&mut self, device: AdvertisedDevice) -> Result<ConnHandle> {
        let (index, refresh_cache, created) =
            if let Some(i) = self.slots.iter().position(|s| s.address() == device.address) {
                if let (true, Some(handle)) = (self.slots[i].is_connected(), self.slots[i].handle) {
                    debug!(address = %device.address, %handle, "Already connected");
                    return Ok(handle);
                }
                // Known peer: keep its service database.
                self.slots[i].device = device.clone();
                (i, false, false)
            } else if let Some(i) = self.slots.iter().position(|s| s.is_idle()) {
                debug!(slot = i, address = %device.address, "Reusing idle client");
                self.slots[i].retarget(device.clone());
                (i, true, false)
            } else if self.slots.len() >= self.config.max_connections {
                warn!("Max clients reached - no more connections available");
                return Err(Error::CapacityExceeded {
                    max: self.config.max_connections,
                });
            } else {
                self.slots
                    .push(ClientConnection::new(device.clone(), self.config.initial_params));
                info!("New client created");
                (self.slots.len() - 1, true, true)
            };

        let handle = match self.establish(index, &device, refresh_cache).await {
            Ok(handle) => handle,
            Err(e) => {
                if created {
                    // A new client without a link holds no useful data.
                    self.slots.remove(index);
                    warn!("Failed to connect, deleted client");
                } else {
                    self.slots[index].reset_link();
                    warn!("Reconnect failed");
                }
                return Err(e);
            }
        };

        self.on_connect(handle).await;

        let peer = device.address;
        match self.agent.run(handle, peer).await {
            Ok(report) => {
                if let Some(slot) = self.slot_mut(handle) {
                    slot.characteristic = report.characteristic.clone();
                }
                self.last_report = Some(report);
                Ok(handle)
            }
            Err(e) if e.is_fatal_for_link() => {
                if let Err(disconnect_err) = self.disconnect(handle).await {
                    warn!("Disconnect after failed discovery: {}", disconnect_err);
                }
                Err(e)
            }
            Err(e) => {
                warn!(%handle, "Discovery error: {}", e);
                Ok(handle)
            }
        }
    }

    async fn establish(
        &mut self,
        index: usize,
        device: &AdvertisedDevice,
        refresh_cache: bool,
    ) -> Result<ConnHandle> {
        // Every link opens fast; the relaxed set is requested once connected.
        let params = self.config.initial_params;
        self.slots[index].params = params;
        self.slots[index].state = ConnectionState::Connecting;

        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.central.connect(device, &params, refresh_cache),
        )
        .await;

        let handle = match attempt {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(Error::ConnectFailed {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::ConnectFailed {
                    reason: format!("timed out after {:?}", self.config.connect_timeout),
                })
            }
        };

        let rssi = self.central.rssi(handle).await;
        self.slots[index].mark_connected(handle, rssi);

        info!(
            address = %device.address,
            rssi = ?rssi,
            "Connected to: {}",
            device.address
        );
        if !refresh_cache {
            info!("Reconnected client");
        }

        Ok(handle)
    }

    /// Tear down a client link. The slot is kept, idle.
    pub async fn disconnect(&mut self, handle: ConnHandle) -> Result<()> {
        let slot = self
            .slot_mut(handle)
            .ok_or(Error::UnknownConnection(handle))?;
        slot.state = ConnectionState::Disconnecting;

        let result = self.central.disconnect(handle).await;

        if let Some(slot) = self.slot_mut(handle) {
            slot.reset_link();
        }
        self.registry.write().remove_connection(handle);

        if let Err(e) = &result {
            error!(%handle, "Failed to disconnect: {}", e);
        }
        result
    }

    /// Tear down a client link whether or not the pool tracks it.
    ///
    /// Used when the radio reports a link the pool never recorded, such as
    /// one that completed after its connect attempt timed out.
    pub async fn force_disconnect(&mut self, handle: ConnHandle) -> Result<()> {
        if self.slot(handle).is_some() {
            return self.disconnect(handle).await;
        }

        warn!(%handle, "Disconnecting untracked client link");
        self.registry.write().remove_connection(handle);
        self.central.disconnect(handle).await
    }

    /// Stop receiving pushes for a characteristic of a live link.
    ///
    /// The subscription is dropped from the registry once the radio has
    /// unsubscribed, so later pushes for it are ignored.
    pub async fn unsubscribe(&mut self, handle: ConnHandle, characteristic: Uuid) -> Result<()> {
        let target = self
            .slot(handle)
            .ok_or(Error::UnknownConnection(handle))?
            .characteristic
            .clone()
            .filter(|c| c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        self.central.unsubscribe(handle, &target).await?;
        if self.registry.write().remove(handle, &characteristic).is_some() {
            info!(%handle, "Unsubscribed from {}", characteristic);
        }
        Ok(())
    }

    /// Record that a client link completed encryption.
    pub fn mark_encrypted(&mut self, handle: ConnHandle) -> Result<()> {
        let slot = self
            .slot_mut(handle)
            .ok_or(Error::UnknownConnection(handle))?;
        slot.encrypted = true;
        Ok(())
    }

    /// Look up the slot of a live link.
    pub fn slot(&self, handle: ConnHandle) -> Option<&ClientConnection> {
        self.slots.iter().find(|s| s.handle == Some(handle))
    }

    fn slot_mut(&mut self, handle: ConnHandle) -> Option<&mut ClientConnection> {
        self.slots.iter_mut().find(|s| s.handle == Some(handle))
    }

    /// All slots, connected or not.
    pub fn slots(&self) -> &[ClientConnection] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of live links.
    pub fn connected_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_connected()).count()
    }

    /// Report of the most recent discovery run.
    pub fn last_report(&self) -> Option<&DiscoveryReport> {
        self.last_report.as_ref()
    }
}

#[async_trait]
impl<C: CentralRadio> ClientCallbacks for ClientConnectionPool<C> {
    async fn on_connect(&mut self, handle: ConnHandle) {
        info!("Connected");
        let relaxed: ConnectionParams = self.config.relaxed_params;
        match self.central.update_conn_params(handle, &relaxed).await {
            Ok(()) => {
                debug!(%handle, "Requested {}", relaxed);
                if let Some(slot) = self.slot_mut(handle) {
                    slot.params = relaxed;
                }
            }
            Err(e) => warn!(%handle, "Failed to update connection parameters: {}", e),
        }
    }

    async fn on_disconnect(&mut self, handle: ConnHandle) {
        match self.slot_mut(handle) {
            Some(slot) => {
                let address = slot.address();
                slot.reset_link();
                info!("{} Disconnected - Starting scan", address);
            }
            None => debug!(%handle, "Disconnect for unknown client - Starting scan"),
        }
        self.registry.write().remove_connection(handle);

        if let Err(e) = self.scanner.start().await {
            error!("Failed to restart scan: {}", e);
        }
    }

    fn on_conn_params_update_request(&self, handle: ConnHandle, params: &ConnectionParams) -> bool {
        let accept = self.negotiator.accepts(params);
        debug!(%handle, %params, accept, "Connection parameter update request");
        accept
    }
}
