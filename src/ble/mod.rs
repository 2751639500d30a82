//! BLE building blocks.
//!
//! Radio interface, advertisement filtering, scan control, connection slots,
//! link security and parameter policy shared by both roles.

pub mod advertising;
pub mod callbacks;
pub mod connection;
pub mod host;
pub mod params;
pub mod radio;
pub mod scanner;
pub mod security;
pub mod uuids;

pub use advertising::{Address, AdvertisedDevice, AdvertisementFilter, Verdict};
pub use callbacks::{
    CharacteristicCallbacks, ClientCallbacks, DescriptorCallbacks, DiscoveryCallbacks,
    ServerCallbacks,
};
pub use connection::{ClientConnection, ConnectionState};
pub use host::BtleplugCentral;
pub use params::{ConnectionParameterNegotiator, ConnectionParams, ParamBounds};
pub use radio::{
    CentralRadio, CharProperties, ConnHandle, ConnectionDescriptor, NotifyStatus, PeripheralRadio,
    RadioEvent, RemoteCharacteristic, RemoteService, Role, SubscriptionMode,
};
pub use scanner::{PendingConnect, Scanner};
pub use security::{AuthVerdict, SecurityGate};
pub use uuids::*;
