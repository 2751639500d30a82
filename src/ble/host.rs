//! Central role over the host Bluetooth stack.
//!
//! Drives a desktop adapter through `btleplug` and feeds what it sees into the
//! node's event channel. Connection parameters, scan timing and the service
//! cache are owned by the operating system here, so the matching requests are
//! only logged.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::{AdvertisedDevice, Address};
use crate::ble::params::ConnectionParams;
use crate::ble::radio::{
    CentralRadio, CharProperties, ConnHandle, RadioEvent, RemoteCharacteristic, RemoteService,
    SubscriptionMode,
};
use crate::config::ScanConfig;
use crate::error::{Error, Result};

type Links = Arc<RwLock<LinkTable<Peripheral>>>;
type Seen = Arc<RwLock<HashMap<Address, PeripheralId>>>;

/// A live client link and the task forwarding its pushes.
struct Link<P> {
    peripheral: P,
    pump: JoinHandle<()>,
}

/// Client links by handle.
///
/// A link's notification pump lives exactly as long as its entry.
struct LinkTable<P> {
    links: HashMap<ConnHandle, Link<P>>,
}

impl<P: Clone> LinkTable<P> {
    fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    fn insert(&mut self, handle: ConnHandle, peripheral: P, pump: JoinHandle<()>) {
        if let Some(old) = self.links.insert(handle, Link { peripheral, pump }) {
            old.pump.abort();
        }
    }

    fn get(&self, handle: ConnHandle) -> Option<P> {
        self.links.get(&handle).map(|l| l.peripheral.clone())
    }

    fn remove(&mut self, handle: ConnHandle) -> Option<P> {
        let link = self.links.remove(&handle)?;
        link.pump.abort();
        Some(link.peripheral)
    }

    /// Remove the first link whose peripheral matches.
    fn remove_where(&mut self, matches: impl Fn(&P) -> bool) -> Option<(ConnHandle, P)> {
        let handle = self
            .links
            .iter()
            .find(|(_, l)| matches(&l.peripheral))
            .map(|(h, _)| *h)?;
        self.remove(handle).map(|p| (handle, p))
    }
}

impl<P> Drop for LinkTable<P> {
    fn drop(&mut self) {
        for link in self.links.values() {
            link.pump.abort();
        }
    }
}

/// [`CentralRadio`] backed by the first host Bluetooth adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
    events: mpsc::Sender<RadioEvent>,
    links: Links,
    seen: Seen,
    next_handle: AtomicU16,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    scan_timer: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugCentral {
    /// Open the first adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if there is no usable adapter.
    pub async fn new(events: mpsc::Sender<RadioEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::RadioUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::RadioUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, events))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter, events: mpsc::Sender<RadioEvent>) -> Self {
        Self {
            adapter,
            events,
            links: Arc::new(RwLock::new(LinkTable::new())),
            seen: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU16::new(1),
            event_pump: Mutex::new(None),
            scan_timer: Mutex::new(None),
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn ensure_event_pump(&self) -> Result<()> {
        if self.event_pump.lock().is_some() {
            return Ok(());
        }

        let mut stream = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let links = self.links.clone();
        let seen = self.seen.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => {
                        if let Some(device) = Self::advertised_device(&adapter, &id).await {
                            seen.write().insert(device.address, id);
                            if events
                                .send(RadioEvent::AdvertisementReport(device))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let dropped = links.write().remove_where(|p| p.id() == id);
                        if let Some((handle, _)) = dropped {
                            debug!(%handle, "Link dropped by host stack");
                            if events
                                .send(RadioEvent::ClientDisconnected { handle })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    other => trace!("Ignored adapter event: {:?}", other),
                }
            }
            debug!("Adapter event pump ended");
        });

        *self.event_pump.lock() = Some(handle);
        Ok(())
    }

    async fn advertised_device(
        adapter: &Adapter,
        id: &PeripheralId,
    ) -> Option<AdvertisedDevice> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        Some(AdvertisedDevice {
            address: Address::from(properties.address),
            name: properties.local_name,
            service_uuids: properties.services,
            rssi: properties.rssi,
        })
    }

    fn link(&self, handle: ConnHandle) -> Result<Peripheral> {
        self.links
            .read()
            .get(handle)
            .ok_or(Error::UnknownConnection(handle))
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid
            })
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.uuid.to_string(),
            })
    }

    fn spawn_notification_pump(
        &self,
        handle: ConnHandle,
        peripheral: Peripheral,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification received from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                let event = RadioEvent::RemoteNotification {
                    handle,
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                    // The host stack does not say which one it was.
                    is_notify: true,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!(%handle, "Notification pump ended");
        })
    }
}

fn char_properties(flags: CharPropFlags) -> CharProperties {
    let mut properties = CharProperties::NONE;
    if flags.contains(CharPropFlags::READ) {
        properties |= CharProperties::READ;
    }
    if flags.contains(CharPropFlags::WRITE) {
        properties |= CharProperties::WRITE;
    }
    if flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        properties |= CharProperties::WRITE_NO_RESPONSE;
    }
    if flags.contains(CharPropFlags::NOTIFY) {
        properties |= CharProperties::NOTIFY;
    }
    if flags.contains(CharPropFlags::INDICATE) {
        properties |= CharProperties::INDICATE;
    }
    properties
}

#[async_trait]
impl CentralRadio for BtleplugCentral {
    async fn start_scan(&self, config: &ScanConfig) -> Result<()> {
        self.ensure_event_pump().await?;

        debug!(
            interval_ms = config.interval_ms,
            window_ms = config.window_ms,
            active = config.active,
            "Scan timing is chosen by the host stack"
        );
        self.adapter.start_scan(ScanFilter::default()).await?;

        if let Some(timer) = self.scan_timer.lock().take() {
            timer.abort();
        }
        if !config.duration.is_zero() {
            let adapter = self.adapter.clone();
            let events = self.events.clone();
            let duration = config.duration;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
                let _ = events.send(RadioEvent::ScanEnded).await;
            });
            *self.scan_timer.lock() = Some(timer);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(timer) = self.scan_timer.lock().take() {
            timer.abort();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(
        &self,
        device: &AdvertisedDevice,
        params: &ConnectionParams,
        refresh_cache: bool,
    ) -> Result<ConnHandle> {
        let id = self
            .seen
            .read()
            .get(&device.address)
            .cloned()
            .ok_or_else(|| Error::ConnectFailed {
                reason: format!("{} has not been seen by the adapter", device.address),
            })?;
        let peripheral = self.adapter.peripheral(&id).await?;

        debug!(%params, refresh_cache, "Connecting to {}", device.address);
        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        // A reconnect replaces any link the host still holds for this peer.
        let stale = self.links.write().remove_where(|p| p.id() == id);
        if let Some((stale, _)) = stale {
            debug!(handle = %stale, "Replacing stale link to {}", device.address);
        }

        let handle = ConnHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let pump = self.spawn_notification_pump(handle, peripheral.clone());
        self.links.write().insert(handle, peripheral, pump);
        Ok(handle)
    }

    async fn disconnect(&self, handle: ConnHandle) -> Result<()> {
        let peripheral = self
            .links
            .write()
            .remove(handle)
            .ok_or(Error::UnknownConnection(handle))?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn update_conn_params(
        &self,
        handle: ConnHandle,
        params: &ConnectionParams,
    ) -> Result<()> {
        debug!(%handle, %params, "Connection parameters are chosen by the host stack");
        Ok(())
    }

    async fn rssi(&self, handle: ConnHandle) -> Option<i16> {
        let peripheral = self.link(handle).ok()?;
        peripheral.properties().await.ok().flatten().and_then(|p| p.rssi)
    }

    async fn discover_service(
        &self,
        handle: ConnHandle,
        uuid: Uuid,
    ) -> Result<Option<RemoteService>> {
        let peripheral = self.link(handle)?;
        let service = peripheral.services().into_iter().find(|s| s.uuid == uuid);

        Ok(service.map(|s| RemoteService {
            uuid: s.uuid,
            characteristics: s
                .characteristics
                .into_iter()
                .map(|c| RemoteCharacteristic {
                    uuid: c.uuid,
                    service_uuid: c.service_uuid,
                    properties: char_properties(c.properties),
                    descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        }))
    }

    async fn read(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Bytes> {
        let peripheral = self.link(handle)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;
        let data = peripheral.read(&target).await?;
        trace!("Read {} bytes from characteristic {}", data.len(), target.uuid);
        Ok(Bytes::from(data))
    }

    async fn read_descriptor(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        descriptor: Uuid,
    ) -> Result<Bytes> {
        let peripheral = self.link(handle)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;
        let descriptor = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| Error::ReadFailed {
                uuid: descriptor.to_string(),
            })?;
        let data = peripheral.read_descriptor(&descriptor).await?;
        Ok(Bytes::from(data))
    }

    async fn write(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        value: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let peripheral = self.link(handle)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        peripheral.write(&target, value, write_type).await?;
        trace!("Wrote {} bytes to characteristic {}", value.len(), target.uuid);
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        mode: SubscriptionMode,
    ) -> Result<()> {
        let peripheral = self.link(handle)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;
        debug!(%handle, %mode, "Subscribing to {}", target.uuid);
        peripheral.subscribe(&target).await?;
        Ok(())
    }

    async fn unsubscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<()> {
        let peripheral = self.link(handle)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;
        peripheral.unsubscribe(&target).await?;
        debug!("Unsubscribed from notifications from {}", target.uuid);
        Ok(())
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
        if let Some(timer) = self.scan_timer.lock().take() {
            timer.abort();
        }
    }
}
