//! The dual-role node and its event loop.
//!
//! [`RadioEventLoop`] owns every piece of mutable state. Radio events and the
//! periodic update both run through `&mut self`, so nothing is mutated
//! concurrently.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::advertising::AdvertisementFilter;
use crate::ble::callbacks::{ClientCallbacks, DiscoveryCallbacks, ServerCallbacks};
use crate::ble::params::ConnectionParameterNegotiator;
use crate::ble::radio::{
    CentralRadio, ConnHandle, ConnectionDescriptor, PeripheralRadio, RadioEvent, Role,
};
use crate::ble::scanner::{PendingConnect, Scanner};
use crate::ble::security::{AuthVerdict, SecurityGate};
use crate::client::ClientConnectionPool;
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::server::PeripheralServer;
use crate::subscriptions::{RemoteNotification, SharedRegistry, SubscriptionRegistry};

/// How often [`RadioEventLoop::run`] calls `update` when no events arrive.
const UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// Handle for a registered callback.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Rate limiter for periodic notifications.
///
/// Fires when it never fired before or when strictly more than one period
/// has passed since the last firing. Missed periods are not caught up.
#[derive(Debug, Clone)]
pub struct NotifyTimer {
    period: Duration,
    last_fired: Option<Instant>,
}

impl NotifyTimer {
    /// Create a timer that has not fired yet.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fired: None,
        }
    }

    /// Check the timer at `now`, resetting it if it fires.
    pub fn fire(&mut self, now: Instant) -> bool {
        let due = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.period,
        };
        if due {
            self.last_fired = Some(now);
        }
        due
    }

    /// The period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// A node acting as central and peripheral at once.
pub struct RadioEventLoop<C: CentralRadio, P: PeripheralRadio> {
    scanner: Scanner<C>,
    pending: PendingConnect,
    pool: ClientConnectionPool<C>,
    server: PeripheralServer<P>,
    security: SecurityGate,
    registry: SharedRegistry,
    notify_timer: NotifyTimer,
    callback_counter: AtomicU64,
}

impl<C: CentralRadio, P: PeripheralRadio> RadioEventLoop<C, P> {
    /// Assemble a node over the two radio roles.
    pub fn new(config: NodeConfig, central: Arc<C>, peripheral: Arc<P>) -> Self {
        let pending = PendingConnect::new();
        let registry = SubscriptionRegistry::shared();
        let scanner = Scanner::new(
            central.clone(),
            config.scan.clone(),
            AdvertisementFilter::default(),
            pending.clone(),
        );
        let pool = ClientConnectionPool::new(
            central,
            config.client.clone(),
            scanner.clone(),
            registry.clone(),
            ConnectionParameterNegotiator::new(config.param_bounds),
        );
        let server = PeripheralServer::new(peripheral, config.server.clone());

        info!(device_name = %config.device_name, "Node created");

        Self {
            scanner,
            pending,
            pool,
            server,
            security: SecurityGate::new(config.security.clone()),
            registry,
            notify_timer: NotifyTimer::new(config.server.notify_period),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Apply the pairing policy, bring up the server tree and advertising,
    /// then start scanning.
    pub async fn start(&mut self) -> Result<()> {
        self.server.configure_security(self.security.config()).await?;
        self.server.start().await?;
        self.scanner.start().await?;
        Ok(())
    }

    /// Route one radio event.
    ///
    /// Errors describe what was refused or torn down; the node keeps running
    /// after any of them.
    pub async fn dispatch(&mut self, event: RadioEvent) -> Result<()> {
        match event {
            RadioEvent::AdvertisementReport(device) => {
                self.scanner.on_result(device).await;
            }
            RadioEvent::ScanEnded => {
                self.scanner.on_scan_ended().await;
            }
            RadioEvent::ClientDisconnected { handle } => {
                self.security.forget(Role::Central, handle);
                self.pool.on_disconnect(handle).await;
            }
            RadioEvent::ParamsUpdateRequest {
                handle,
                params,
                reply,
            } => {
                let accept = self.pool.on_conn_params_update_request(handle, &params);
                if let Some(reply) = reply {
                    let _ = reply.send(accept);
                }
            }
            RadioEvent::AuthenticationComplete(descriptor) => {
                return self.on_authentication_complete(descriptor).await;
            }
            RadioEvent::PasskeyRequest { reply } => {
                let _ = reply.send(self.security.passkey());
            }
            RadioEvent::ConfirmPasskey { passkey, reply } => {
                let _ = reply.send(self.security.confirm_passkey(passkey));
            }
            RadioEvent::PeerConnected(descriptor) => {
                self.server.on_connect(descriptor).await;
            }
            RadioEvent::PeerDisconnected { handle } => {
                self.security.forget(Role::Peripheral, handle);
                self.server.on_disconnect(handle).await;
            }
            RadioEvent::CharacteristicRead {
                handle,
                characteristic,
                reply,
            } => {
                let result = self.server.on_read(handle, characteristic).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result.as_ref().ok().cloned());
                }
                result?;
            }
            RadioEvent::CharacteristicWrite {
                handle,
                characteristic,
                value,
            } => {
                self.server.on_write(handle, characteristic, value).await?;
            }
            RadioEvent::DescriptorRead {
                handle,
                characteristic,
                descriptor,
            } => {
                self.server
                    .on_descriptor_read(handle, characteristic, descriptor)?;
            }
            RadioEvent::DescriptorWrite {
                handle,
                characteristic,
                descriptor,
                value,
            } => {
                self.server
                    .on_descriptor_write(handle, characteristic, descriptor, value)?;
            }
            RadioEvent::NotifyStatus {
                characteristic,
                status,
                code,
            } => {
                self.server.on_status(characteristic, status, code);
            }
            RadioEvent::SubscribeChanged {
                handle,
                peer,
                characteristic,
                value,
            } => {
                self.server.on_subscribe(handle, peer, characteristic, value);
            }
            RadioEvent::RemoteNotification {
                handle,
                characteristic,
                value,
                is_notify,
            } => {
                let disposition =
                    self.registry
                        .read()
                        .handle_notification(handle, characteristic, &value, is_notify);
                debug!(%handle, ?disposition, "Remote push handled");
            }
        }
        Ok(())
    }

    async fn on_authentication_complete(&mut self, descriptor: ConnectionDescriptor) -> Result<()> {
        let handle = descriptor.handle;
        match self.security.on_authentication_complete(&descriptor) {
            AuthVerdict::Trusted => {
                let marked = match descriptor.role {
                    Role::Central => self.pool.mark_encrypted(handle),
                    Role::Peripheral => self.server.mark_encrypted(handle),
                };
                if let Err(e) = marked {
                    debug!(%handle, "Encrypted link not tracked: {}", e);
                }
                Ok(())
            }
            AuthVerdict::Disconnect => {
                let teardown = match descriptor.role {
                    Role::Central => self.pool.force_disconnect(handle).await,
                    Role::Peripheral => self.server.reject(handle).await,
                };
                if let Err(e) = teardown {
                    warn!(%handle, "Teardown after failed encryption: {}", e);
                }
                Err(Error::EncryptionFailed { handle })
            }
            AuthVerdict::AlreadyEvaluated => Ok(()),
        }
    }

    /// Run one update pass now.
    pub async fn update(&mut self) -> Option<Result<ConnHandle>> {
        self.update_at(Instant::now()).await
    }

    /// Run one update pass at `now`.
    ///
    /// Connects to a pending candidate if there is one, restarting the scan
    /// whatever the outcome, then lets the notify timer fire. Returns the
    /// outcome of the connect attempt made in this pass.
    pub async fn update_at(&mut self, now: Instant) -> Option<Result<ConnHandle>> {
        let outcome = match self.pending.take() {
            Some(device) => {
                let result = self.pool.connect_or_reuse(device).await;
                match &result {
                    Ok(_) => {
                        info!("Success! we should now be getting notifications, scanning for more!")
                    }
                    Err(e) => warn!("Failed to connect, starting scan: {}", e),
                }
                if let Err(e) = self.scanner.start().await {
                    warn!("Failed to restart scan: {}", e);
                }
                Some(result)
            }
            None => None,
        };

        if self.notify_timer.fire(now) {
            if let Err(e) = self.server.notify_tick().await {
                warn!("Periodic notification failed: {}", e);
            }
        }

        outcome
    }

    /// Drive the node until `shutdown` resolves or the radio closes the
    /// event channel.
    pub async fn run<F>(&mut self, mut events: mpsc::Receiver<RadioEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.dispatch(event).await {
                            warn!("{}", e);
                        }
                        if self.pending.is_pending() {
                            self.update().await;
                        }
                    }
                    None => {
                        info!("Radio event channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.update().await;
                }
            }
        }
    }

    /// Stop receiving pushes for a characteristic of a client link.
    pub async fn unsubscribe(&mut self, handle: ConnHandle, characteristic: Uuid) -> Result<()> {
        self.pool.unsubscribe(handle, characteristic).await
    }

    /// Register a callback for dispatched notifications.
    ///
    /// The callback runs on its own task until the handle is dropped.
    pub fn on_notification<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&RemoteNotification) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.subscribe_notifications();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => callback(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification callback lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Receive dispatched notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RemoteNotification> {
        self.registry.read().subscribe()
    }

    /// The client pool.
    pub fn pool(&self) -> &ClientConnectionPool<C> {
        &self.pool
    }

    /// The peripheral server.
    pub fn server(&self) -> &PeripheralServer<P> {
        &self.server
    }

    /// The peripheral server, for changing values and observers.
    pub fn server_mut(&mut self) -> &mut PeripheralServer<P> {
        &mut self.server
    }

    /// The scanner.
    pub fn scanner(&self) -> &Scanner<C> {
        &self.scanner
    }

    /// The pending-connect mailbox.
    pub fn pending(&self) -> &PendingConnect {
        &self.pending
    }

    /// The subscription registry.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}
