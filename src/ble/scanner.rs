//! Scan control.
//!
//! Owns the scan window and turns advertisement reports into pending connect
//! requests for the event loop.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::ble::advertising::{AdvertisedDevice, AdvertisementFilter, Verdict};
use crate::ble::callbacks::DiscoveryCallbacks;
use crate::ble::radio::CentralRadio;
use crate::config::ScanConfig;
use crate::error::Result;

/// Single-slot mailbox for the device to connect to next.
///
/// Posted from the discovery callback and drained by the event loop tick, so
/// the slow connect never runs inside the callback. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct PendingConnect {
    slot: Arc<Mutex<Option<AdvertisedDevice>>>,
}

impl PendingConnect {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a device. Returns the device it replaced, if any.
    pub fn post(&self, device: AdvertisedDevice) -> Option<AdvertisedDevice> {
        self.slot.lock().replace(device)
    }

    /// Clear the latch and return its device.
    pub fn take(&self) -> Option<AdvertisedDevice> {
        self.slot.lock().take()
    }

    /// Check whether a connect request is waiting.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Starts and stops scanning and filters what the scan finds.
pub struct Scanner<C: CentralRadio> {
    central: Arc<C>,
    config: ScanConfig,
    filter: AdvertisementFilter,
    pending: PendingConnect,
    is_scanning: Arc<AtomicBool>,
}

impl<C: CentralRadio> Clone for Scanner<C> {
    fn clone(&self) -> Self {
        Self {
            central: self.central.clone(),
            config: self.config.clone(),
            filter: self.filter.clone(),
            pending: self.pending.clone(),
            is_scanning: self.is_scanning.clone(),
        }
    }
}

impl<C: CentralRadio> Scanner<C> {
    /// Create a scanner posting candidates into `pending`.
    pub fn new(
        central: Arc<C>,
        config: ScanConfig,
        filter: AdvertisementFilter,
        pending: PendingConnect,
    ) -> Self {
        Self {
            central,
            config,
            filter,
            pending,
            is_scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a scan window.
    ///
    /// The command is always sent, even if a scan is believed to be running;
    /// the radio treats a redundant start as a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.is_scanning() {
            debug!("Scan believed active, restarting anyway");
        }

        match self.central.start_scan(&self.config).await {
            Ok(()) => {
                self.is_scanning.store(true, Ordering::SeqCst);
                info!(
                    duration_secs = self.config.duration.as_secs(),
                    active = self.config.active,
                    "Scan started"
                );
                Ok(())
            }
            Err(e) => {
                error!("Scan error: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the current scan window.
    pub async fn stop(&self) -> Result<()> {
        self.central.stop_scan().await?;
        self.is_scanning.store(false, Ordering::SeqCst);
        debug!("Scan stopped");
        Ok(())
    }

    /// Check if a scan window is open.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// The mailbox candidates are posted to.
    pub fn pending(&self) -> &PendingConnect {
        &self.pending
    }

    /// The filter in use.
    pub fn filter(&self) -> &AdvertisementFilter {
        &self.filter
    }
}

#[async_trait]
impl<C: CentralRadio> DiscoveryCallbacks for Scanner<C> {
    async fn on_result(&mut self, device: AdvertisedDevice) {
        trace!("Advertised device found: {}", device);

        if self.filter.evaluate(&device) == Verdict::Ignore {
            return;
        }

        info!(address = %device.address, "Found configuration service");

        // Stop before connecting.
        if let Err(e) = self.stop().await {
            warn!("Failed to stop scan: {}", e);
        }

        if let Some(previous) = self.pending.post(device) {
            debug!("Replaced pending connect to {}", previous.address);
        }
    }

    async fn on_scan_ended(&mut self) {
        self.is_scanning.store(false, Ordering::SeqCst);
        info!("Scan ended");
    }
}
