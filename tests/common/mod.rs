//! Recording fake radios shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use dual_role_ble::ble::uuids::{CONFIGURATION_CHARACTERISTIC_UUID, CONFIGURATION_SERVICE_UUID};
use dual_role_ble::ble::{RemoteCharacteristic, RemoteService};
use dual_role_ble::{
    Address, AdvertisedDevice, CentralRadio, CharProperties, ConnHandle, ConnectionParams, Error,
    LocalService, PeripheralRadio, Result, ScanConfig, SecurityConfig, SubscriptionMode,
};

/// Commands the core sent to the central radio.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralCommand {
    StartScan,
    StopScan,
    Connect {
        address: Address,
        params: ConnectionParams,
        refresh_cache: bool,
    },
    Disconnect(ConnHandle),
    UpdateParams(ConnHandle, ConnectionParams),
    Read(ConnHandle, Uuid),
    ReadDescriptor(ConnHandle, Uuid),
    Write(ConnHandle, Uuid, Vec<u8>),
    Subscribe(ConnHandle, Uuid, SubscriptionMode),
    Unsubscribe(ConnHandle, Uuid),
}

/// Central radio that succeeds unless told otherwise and records every call.
pub struct FakeCentral {
    commands: Mutex<Vec<CentralCommand>>,
    scanning: AtomicBool,
    next_handle: AtomicU16,
    pub service: Mutex<Option<RemoteService>>,
    pub value: Mutex<Bytes>,
    pub fail_connect: AtomicBool,
    pub fail_write: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Time `connect` takes before answering.
    pub connect_delay: Mutex<Option<Duration>>,
}

impl FakeCentral {
    /// A peer exposing a readable, writable, notifying configuration
    /// characteristic.
    pub fn new() -> Self {
        Self::with_properties(
            CharProperties::READ | CharProperties::WRITE | CharProperties::NOTIFY,
        )
    }

    pub fn with_properties(properties: CharProperties) -> Self {
        let service = RemoteService {
            uuid: CONFIGURATION_SERVICE_UUID,
            characteristics: vec![RemoteCharacteristic {
                uuid: CONFIGURATION_CHARACTERISTIC_UUID,
                service_uuid: CONFIGURATION_SERVICE_UUID,
                properties,
                descriptors: vec![],
            }],
        };
        Self {
            commands: Mutex::new(Vec::new()),
            scanning: AtomicBool::new(false),
            next_handle: AtomicU16::new(1),
            service: Mutex::new(Some(service)),
            value: Mutex::new(Bytes::from_static(b"value")),
            fail_connect: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
        }
    }

    pub fn commands(&self) -> Vec<CentralCommand> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn count(&self, pred: impl Fn(&CentralCommand) -> bool) -> usize {
        self.commands.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, command: CentralCommand) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl CentralRadio for FakeCentral {
    async fn start_scan(&self, _config: &ScanConfig) -> Result<()> {
        self.record(CentralCommand::StartScan);
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(CentralCommand::StopScan);
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(
        &self,
        device: &AdvertisedDevice,
        params: &ConnectionParams,
        refresh_cache: bool,
    ) -> Result<ConnHandle> {
        self.record(CentralCommand::Connect {
            address: device.address,
            params: *params,
            refresh_cache,
        });
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectFailed {
                reason: "peer did not answer".into(),
            });
        }
        Ok(ConnHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    async fn disconnect(&self, handle: ConnHandle) -> Result<()> {
        self.record(CentralCommand::Disconnect(handle));
        Ok(())
    }

    async fn update_conn_params(
        &self,
        handle: ConnHandle,
        params: &ConnectionParams,
    ) -> Result<()> {
        self.record(CentralCommand::UpdateParams(handle, *params));
        Ok(())
    }

    async fn rssi(&self, _handle: ConnHandle) -> Option<i16> {
        Some(-48)
    }

    async fn discover_service(
        &self,
        _handle: ConnHandle,
        uuid: Uuid,
    ) -> Result<Option<RemoteService>> {
        Ok(self.service.lock().clone().filter(|s| s.uuid == uuid))
    }

    async fn read(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Bytes> {
        self.record(CentralCommand::Read(handle, characteristic.uuid));
        Ok(self.value.lock().clone())
    }

    async fn read_descriptor(
        &self,
        handle: ConnHandle,
        _characteristic: &RemoteCharacteristic,
        descriptor: Uuid,
    ) -> Result<Bytes> {
        self.record(CentralCommand::ReadDescriptor(handle, descriptor));
        Ok(Bytes::new())
    }

    async fn write(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        value: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        self.record(CentralCommand::Write(handle, characteristic.uuid, value.to_vec()));
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        *self.value.lock() = Bytes::copy_from_slice(value);
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
        mode: SubscriptionMode,
    ) -> Result<()> {
        self.record(CentralCommand::Subscribe(handle, characteristic.uuid, mode));
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        handle: ConnHandle,
        characteristic: &RemoteCharacteristic,
    ) -> Result<()> {
        self.record(CentralCommand::Unsubscribe(handle, characteristic.uuid));
        Ok(())
    }
}

/// Commands the core sent to the peripheral radio.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralCommand {
    ConfigureSecurity(SecurityConfig),
    RegisterService(Uuid),
    StartAdvertising(Vec<Uuid>),
    Disconnect(ConnHandle),
    UpdateParams(ConnHandle, ConnectionParams),
    Notify(Uuid, Vec<u8>),
}

/// Peripheral radio that always succeeds and records every call.
pub struct FakePeripheral {
    commands: Mutex<Vec<PeripheralCommand>>,
    advertising: AtomicBool,
}

impl FakePeripheral {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            advertising: AtomicBool::new(false),
        }
    }

    pub fn commands(&self) -> Vec<PeripheralCommand> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    /// Pretend the stack stopped advertising, as it does when a central
    /// connects.
    pub fn stop_advertising(&self) {
        self.advertising.store(false, Ordering::SeqCst);
    }

    pub fn count(&self, pred: impl Fn(&PeripheralCommand) -> bool) -> usize {
        self.commands.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, command: PeripheralCommand) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl PeripheralRadio for FakePeripheral {
    async fn configure_security(&self, config: &SecurityConfig) -> Result<()> {
        self.record(PeripheralCommand::ConfigureSecurity(config.clone()));
        Ok(())
    }

    async fn register_service(&self, service: &LocalService) -> Result<()> {
        self.record(PeripheralCommand::RegisterService(service.uuid));
        Ok(())
    }

    async fn start_advertising(
        &self,
        service_uuids: &[Uuid],
        _scan_response: bool,
    ) -> Result<()> {
        self.record(PeripheralCommand::StartAdvertising(service_uuids.to_vec()));
        self.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, handle: ConnHandle) -> Result<()> {
        self.record(PeripheralCommand::Disconnect(handle));
        Ok(())
    }

    async fn update_conn_params(
        &self,
        handle: ConnHandle,
        params: &ConnectionParams,
    ) -> Result<()> {
        self.record(PeripheralCommand::UpdateParams(handle, *params));
        Ok(())
    }

    async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        self.record(PeripheralCommand::Notify(characteristic, value.to_vec()));
        Ok(())
    }
}

/// An advertiser of the configuration service.
pub fn candidate(byte: u8) -> AdvertisedDevice {
    AdvertisedDevice::new(Address::new([byte; 6]), vec![CONFIGURATION_SERVICE_UUID])
        .with_name(format!("peer-{}", byte))
        .with_rssi(-60)
}

/// Install a test subscriber once; repeated calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
