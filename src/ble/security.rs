//! Link encryption policy.
//!
//! Every link, whichever role it was opened in, must come out of
//! authentication encrypted. Anything else is disconnected.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::ble::radio::{ConnHandle, ConnectionDescriptor, Role};
use crate::config::SecurityConfig;

/// Outcome of an authentication-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    /// The link is encrypted.
    Trusted,
    /// The link must be torn down.
    Disconnect,
    /// Already evaluated for this link; nothing to do.
    AlreadyEvaluated,
}

/// Decides what happens to a link once pairing finishes, and answers the
/// pairing IO prompts.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    config: SecurityConfig,
    evaluated: HashSet<(Role, ConnHandle)>,
}

impl SecurityGate {
    /// Create a gate.
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            evaluated: HashSet::new(),
        }
    }

    /// Evaluate a finished authentication.
    ///
    /// A link is evaluated once; later events for the same role and handle
    /// are reported as [`AuthVerdict::AlreadyEvaluated`] until
    /// [`forget`](Self::forget) is called for it.
    pub fn on_authentication_complete(&mut self, descriptor: &ConnectionDescriptor) -> AuthVerdict {
        if !self.evaluated.insert((descriptor.role, descriptor.handle)) {
            debug!(
                handle = %descriptor.handle,
                role = %descriptor.role,
                "Authentication already evaluated"
            );
            return AuthVerdict::AlreadyEvaluated;
        }

        if descriptor.encrypted {
            if descriptor.role == Role::Peripheral {
                info!(handle = %descriptor.handle, "Starting BLE work");
            } else {
                debug!(handle = %descriptor.handle, "Client link encrypted");
            }
            AuthVerdict::Trusted
        } else {
            warn!(
                handle = %descriptor.handle,
                role = %descriptor.role,
                peer = %descriptor.peer,
                "Encrypt connection failed - disconnecting"
            );
            AuthVerdict::Disconnect
        }
    }

    /// Drop the record of a closed link so a reused handle is evaluated again.
    pub fn forget(&mut self, role: Role, handle: ConnHandle) {
        self.evaluated.remove(&(role, handle));
    }

    /// Passkey handed to the stack.
    pub fn passkey(&self) -> u32 {
        debug!("Passkey requested");
        self.config.passkey
    }

    /// Answer a numeric comparison prompt.
    pub fn confirm_passkey(&self, passkey: u32) -> bool {
        debug!(passkey, accept = self.config.accept_numeric_comparison, "Confirm passkey");
        self.config.accept_numeric_comparison
    }

    /// The configured policy.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}
