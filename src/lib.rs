// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # dual-role-ble
//!
//! Connection lifecycle and subscription management for a Bluetooth Low
//! Energy node that is central and peripheral at the same time.
//!
//! As a **central**, the node scans for peers advertising the configuration
//! service, connects to up to three of them, reads, writes and subscribes to
//! their configuration characteristic, and reconnects as they come and go.
//! As a **peripheral**, it hosts an encrypted session service and accepts any
//! number of centrals.
//!
//! ## Features
//!
//! - **Bounded client pool**: slot reuse for returning peers, idle slot
//!   recycling and a hard capacity limit
//! - **Service discovery**: read, companion descriptor, configured write and
//!   notify/indicate subscription on each new peer
//! - **Notification dispatch**: keep-alive filtering and broadcast delivery
//! - **Encryption gating**: unencrypted links are torn down in either role
//! - **Parameter policy**: bounded acceptance of peer parameter requests
//! - **Radio-agnostic core**: the radio sits behind [`CentralRadio`] and
//!   [`PeripheralRadio`]; a `btleplug` central backend is included
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dual_role_ble::{BtleplugCentral, NodeConfig, RadioEventLoop, Result};
//! # use dual_role_ble::{
//! #     ConnHandle, ConnectionParams, LocalService, PeripheralRadio, SecurityConfig,
//! # };
//! # struct NoPeripheral;
//! # #[async_trait::async_trait]
//! # impl PeripheralRadio for NoPeripheral {
//! #     async fn configure_security(&self, _: &SecurityConfig) -> Result<()> { Ok(()) }
//! #     async fn register_service(&self, _: &LocalService) -> Result<()> { Ok(()) }
//! #     async fn start_advertising(&self, _: &[uuid::Uuid], _: bool) -> Result<()> { Ok(()) }
//! #     async fn disconnect(&self, _: ConnHandle) -> Result<()> { Ok(()) }
//! #     async fn update_conn_params(&self, _: ConnHandle, _: &ConnectionParams) -> Result<()> {
//! #         Ok(())
//! #     }
//! #     async fn notify(&self, _: uuid::Uuid, _: &[u8]) -> Result<()> { Ok(()) }
//! # }
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     let central = Arc::new(BtleplugCentral::new(tx).await?);
//!
//!     let peripheral = Arc::new(NoPeripheral);
//!     let mut node = RadioEventLoop::new(NodeConfig::default(), central, peripheral);
//!     node.start().await?;
//!
//!     let _handle = node.on_notification(|n| println!("{}", n));
//!     node.run(rx, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! The `btleplug` backend only covers the central role. The peripheral role
//! needs a [`PeripheralRadio`] for the target stack.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration types

// Public modules
pub mod ble;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod node;
pub mod server;
pub mod subscriptions;
pub mod utils;

// Re-exports for convenience
pub use client::ClientConnectionPool;
pub use config::{ClientConfig, NodeConfig, ScanConfig, SecurityConfig, ServerConfig};
pub use discovery::{DiscoveryOutcome, DiscoveryReport, ServiceDiscoveryAgent};
pub use error::{Error, Result};
pub use node::{CallbackHandle, NotifyTimer, RadioEventLoop};
pub use server::{
    AttributeLogger, LocalCharacteristic, LocalDescriptor, LocalService, PeerState,
    PeripheralServer, ServerConnection, SubscriptionIntent,
};
pub use subscriptions::{
    Disposition, RemoteNotification, SharedRegistry, Subscription, SubscriptionRegistry,
};

// Re-export commonly used types from submodules
pub use ble::{
    Address, AdvertisedDevice, AdvertisementFilter, BtleplugCentral, CentralRadio, CharProperties,
    ConnHandle, ConnectionDescriptor, ConnectionParameterNegotiator, ConnectionParams,
    ConnectionState, NotifyStatus, ParamBounds, PeripheralRadio, RadioEvent, Role,
    SubscriptionMode,
};
