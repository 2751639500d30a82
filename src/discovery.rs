//! Post-connect walk of the remote configuration service.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::ble::advertising::Address;
use crate::ble::radio::{CentralRadio, ConnHandle, RemoteCharacteristic, SubscriptionMode};
use crate::ble::uuids::{
    COMPANION_DESCRIPTOR_UUID, CONFIGURATION_CHARACTERISTIC_UUID, CONFIGURATION_SERVICE_UUID,
};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::subscriptions::{SharedRegistry, Subscription};
use crate::utils::display_value;

/// How far discovery got on a link that stays up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Subscribed to the configuration characteristic.
    Subscribed(SubscriptionMode),
    /// The characteristic supports neither notifications nor indications.
    NoPushSupport,
    /// The peer has no configuration service.
    ServiceNotFound,
    /// The configuration service has no configuration characteristic.
    CharacteristicNotFound,
}

/// What discovery learned about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// The client connection.
    pub handle: ConnHandle,
    /// The configuration characteristic, when found.
    pub characteristic: Option<RemoteCharacteristic>,
    /// Value read before writing.
    pub initial_value: Option<Bytes>,
    /// Value of the companion descriptor.
    pub descriptor_value: Option<Bytes>,
    /// Whether the configured payload was written.
    pub written: bool,
    /// Value read back after the write.
    pub value_after_write: Option<Bytes>,
    /// Final outcome.
    pub outcome: DiscoveryOutcome,
}

impl DiscoveryReport {
    fn new(handle: ConnHandle, outcome: DiscoveryOutcome) -> Self {
        Self {
            handle,
            characteristic: None,
            initial_value: None,
            descriptor_value: None,
            written: false,
            value_after_write: None,
            outcome,
        }
    }

    /// Check whether a subscription was set up.
    pub fn is_subscribed(&self) -> bool {
        matches!(self.outcome, DiscoveryOutcome::Subscribed(_))
    }
}

/// Walks a freshly connected peer: read, write, subscribe.
pub struct ServiceDiscoveryAgent<C: CentralRadio> {
    central: Arc<C>,
    registry: SharedRegistry,
    write_payload: Bytes,
    write_with_response: bool,
}

impl<C: CentralRadio> ServiceDiscoveryAgent<C> {
    /// Create an agent recording subscriptions into `registry`.
    pub fn new(central: Arc<C>, registry: SharedRegistry, config: &ClientConfig) -> Self {
        Self {
            central,
            registry,
            write_payload: Bytes::from(config.write_payload.clone()),
            write_with_response: config.write_with_response,
        }
    }

    /// Run discovery on a connected client.
    ///
    /// A missing service or characteristic leaves the link up and is reported
    /// in the outcome. A failed write or subscribe returns an error for which
    /// [`Error::is_fatal_for_link`] holds; the caller drops the link.
    pub async fn run(&self, handle: ConnHandle, peer: Address) -> Result<DiscoveryReport> {
        let service = match self
            .central
            .discover_service(handle, CONFIGURATION_SERVICE_UUID)
            .await?
        {
            Some(service) => service,
            None => {
                warn!(%handle, %peer, "Configuration service not found");
                return Ok(DiscoveryReport::new(handle, DiscoveryOutcome::ServiceNotFound));
            }
        };

        let characteristic = match service.characteristic(&CONFIGURATION_CHARACTERISTIC_UUID) {
            Some(c) => c.clone(),
            None => {
                warn!(%handle, %peer, "Configuration characteristic not found");
                return Ok(DiscoveryReport::new(
                    handle,
                    DiscoveryOutcome::CharacteristicNotFound,
                ));
            }
        };

        let mut report = DiscoveryReport::new(handle, DiscoveryOutcome::NoPushSupport);

        if characteristic.properties.can_read() {
            report.initial_value = self.read_logged(handle, &characteristic).await;
        }

        if characteristic.has_descriptor(&COMPANION_DESCRIPTOR_UUID) {
            match self
                .central
                .read_descriptor(handle, &characteristic, COMPANION_DESCRIPTOR_UUID)
                .await
            {
                Ok(value) => {
                    info!(
                        descriptor = %COMPANION_DESCRIPTOR_UUID,
                        value = %display_value(&value),
                        "Descriptor read"
                    );
                    report.descriptor_value = Some(value);
                }
                Err(e) => warn!("Descriptor read failed: {}", e),
            }
        }

        if characteristic.properties.can_write() {
            if let Err(e) = self
                .central
                .write(
                    handle,
                    &characteristic,
                    &self.write_payload,
                    self.write_with_response,
                )
                .await
            {
                warn!(%handle, "Write failed: {}", e);
                return Err(Error::WriteFailed {
                    uuid: characteristic.uuid.to_string(),
                });
            }
            info!("Wrote new value to: {}", characteristic.uuid);
            report.written = true;

            if characteristic.properties.can_read() {
                report.value_after_write = self.read_logged(handle, &characteristic).await;
            }
        }

        let mode = if characteristic.properties.can_notify() {
            Some(SubscriptionMode::Notify)
        } else if characteristic.properties.can_indicate() {
            Some(SubscriptionMode::Indicate)
        } else {
            None
        };

        if let Some(mode) = mode {
            if let Err(e) = self.central.subscribe(handle, &characteristic, mode).await {
                warn!(%handle, "Subscribe failed: {}", e);
                return Err(Error::SubscribeFailed {
                    uuid: characteristic.uuid.to_string(),
                });
            }

            self.registry.write().insert(
                handle,
                characteristic.uuid,
                Subscription {
                    peer,
                    service: service.uuid,
                    mode,
                    active: true,
                },
            );
            report.outcome = DiscoveryOutcome::Subscribed(mode);
        } else {
            debug!(%handle, "Characteristic cannot push, not subscribing");
        }

        report.characteristic = Some(characteristic);
        Ok(report)
    }

    async fn read_logged(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Option<Bytes> {
        match self.central.read(handle, characteristic).await {
            Ok(value) => {
                info!("{} Value: {}", characteristic.uuid, display_value(&value));
                Some(value)
            }
            Err(e) => {
                warn!("Read of {} failed: {}", characteristic.uuid, e);
                None
            }
        }
    }
}
