//! Observer capabilities registered with the radio.
//!
//! Each capability is a separate trait implemented by the component that owns
//! the matching state, rather than one object handling every callback.

use async_trait::async_trait;

use crate::ble::advertising::{Address, AdvertisedDevice};
use crate::ble::params::ConnectionParams;
use crate::ble::radio::{ConnHandle, ConnectionDescriptor, NotifyStatus};
use crate::server::gatt::{LocalCharacteristic, LocalDescriptor, SubscriptionIntent};

/// Scan results.
#[async_trait]
pub trait DiscoveryCallbacks: Send {
    /// An advertiser was found.
    async fn on_result(&mut self, device: AdvertisedDevice);

    /// The scan window closed.
    async fn on_scan_ended(&mut self) {}
}

/// Client-role link lifecycle.
#[async_trait]
pub trait ClientCallbacks: Send {
    /// A client link came up.
    async fn on_connect(&mut self, handle: ConnHandle);

    /// A client link went down.
    async fn on_disconnect(&mut self, handle: ConnHandle);

    /// The remote server proposes new connection parameters. Return true to
    /// accept and apply them.
    fn on_conn_params_update_request(&self, handle: ConnHandle, params: &ConnectionParams) -> bool;
}

/// Server-role link lifecycle.
#[async_trait]
pub trait ServerCallbacks: Send {
    /// A central connected.
    async fn on_connect(&mut self, descriptor: ConnectionDescriptor);

    /// A central disconnected.
    async fn on_disconnect(&mut self, handle: ConnHandle);
}

/// Local characteristic access.
pub trait CharacteristicCallbacks: Send {
    /// A central read the value.
    fn on_read(&mut self, characteristic: &LocalCharacteristic, handle: ConnHandle) {
        let _ = (characteristic, handle);
    }

    /// A central wrote a new value.
    fn on_write(&mut self, characteristic: &LocalCharacteristic, handle: ConnHandle) {
        let _ = (characteristic, handle);
    }

    /// Called before a notification or indication is sent; `value` may be
    /// changed here.
    fn on_notify(&mut self, characteristic: &LocalCharacteristic, value: &mut Vec<u8>) {
        let _ = (characteristic, value);
    }

    /// Delivery status of a previous notification or indication.
    fn on_status(&mut self, characteristic: &LocalCharacteristic, status: NotifyStatus, code: i32) {
        let _ = (characteristic, status, code);
    }

    /// A central changed its subscription.
    fn on_subscribe(
        &mut self,
        characteristic: &LocalCharacteristic,
        handle: ConnHandle,
        peer: Address,
        intent: SubscriptionIntent,
    ) {
        let _ = (characteristic, handle, peer, intent);
    }
}

/// Local descriptor access.
pub trait DescriptorCallbacks: Send {
    /// A central read the descriptor.
    fn on_read(&mut self, descriptor: &LocalDescriptor) {
        let _ = descriptor;
    }

    /// A central wrote the descriptor.
    fn on_write(&mut self, descriptor: &LocalDescriptor) {
        let _ = descriptor;
    }
}
