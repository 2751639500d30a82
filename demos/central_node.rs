//! Dual-role node example
//!
//! Scans for peers advertising the configuration service, connects to up to
//! three of them and prints every notification they push. The peripheral role
//! is stubbed out with a radio that only logs, since the btleplug backend
//! cannot host a GATT server.
//!
//! Run with: cargo run --example central_node
//!
//! Options:
//!   --max-clients N   limit the client pool (default 3)

use async_trait::async_trait;
use dual_role_ble::{
    BtleplugCentral, ConnHandle, ConnectionParams, LocalService, NodeConfig, PeripheralRadio,
    RadioEventLoop, Result, SecurityConfig,
};
use std::sync::Arc;
use uuid::Uuid;

/// Peripheral radio that accepts every command and logs it.
struct LoggingPeripheral;

#[async_trait]
impl PeripheralRadio for LoggingPeripheral {
    async fn configure_security(&self, config: &SecurityConfig) -> Result<()> {
        tracing::info!(
            "Would pair with bonding={} mitm={} sc={}",
            config.bonding,
            config.mitm,
            config.secure_connections
        );
        Ok(())
    }

    async fn register_service(&self, service: &LocalService) -> Result<()> {
        tracing::info!("Would register service {}", service.uuid);
        Ok(())
    }

    async fn start_advertising(&self, service_uuids: &[Uuid], _scan_response: bool) -> Result<()> {
        tracing::info!("Would advertise {:?}", service_uuids);
        Ok(())
    }

    async fn disconnect(&self, handle: ConnHandle) -> Result<()> {
        tracing::info!("Would disconnect {}", handle);
        Ok(())
    }

    async fn update_conn_params(
        &self,
        handle: ConnHandle,
        params: &ConnectionParams,
    ) -> Result<()> {
        tracing::info!("Would request {} on {}", params, handle);
        Ok(())
    }

    async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        tracing::info!("Would notify {} ({} bytes)", characteristic, value.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dual_role_ble=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let max_clients = args
        .iter()
        .position(|arg| arg == "--max-clients")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);

    println!("Dual-role BLE node");
    println!("==================\n");
    println!("Client pool size: {}", max_clients);
    println!("Press Ctrl+C to stop\n");

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let central = Arc::new(BtleplugCentral::new(tx).await?);
    let config = NodeConfig::default().with_max_clients(max_clients);

    let mut node = RadioEventLoop::new(config, central, Arc::new(LoggingPeripheral));
    node.start().await?;

    let _handle = node.on_notification(|notification| {
        println!("{}", notification);
    });

    node.run(rx, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    println!("\nConnected clients at exit: {}", node.pool().connected_count());
    Ok(())
}
