//! Connection parameters and the acceptance policy for peer update requests.
//!
//! Intervals are in 1.25 ms units, supervision timeout in 10 ms units and
//! latency in skipped connection events, matching the link-layer encoding.

use std::time::Duration;

use crate::utils::{interval_units_to_duration, timeout_units_to_duration};

/// Link polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionParams {
    /// Minimum connection interval (1.25 ms units).
    pub interval_min: u16,
    /// Maximum connection interval (1.25 ms units).
    pub interval_max: u16,
    /// Number of connection events the peripheral may skip.
    pub latency: u16,
    /// Supervision timeout (10 ms units).
    pub supervision_timeout: u16,
}

impl ConnectionParams {
    /// Parameters applied to a freshly created client: 15 ms, latency 0, 510 ms.
    ///
    /// Safe for three clients connecting reliably.
    pub const INITIAL_CLIENT: Self = Self::new(12, 12, 0, 51);

    /// Parameters applied once a client link is up: 150 ms, latency 0, 600 ms.
    pub const RELAXED_CLIENT: Self = Self::new(120, 120, 0, 60);

    /// Parameters the peripheral requests from each inbound central: 30-60 ms,
    /// latency 0, 600 ms.
    pub const SERVER_PREFERRED: Self = Self::new(24, 48, 0, 60);

    /// Create a parameter set.
    pub const fn new(
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        supervision_timeout: u16,
    ) -> Self {
        Self {
            interval_min,
            interval_max,
            latency,
            supervision_timeout,
        }
    }

    /// Minimum interval as a duration.
    pub fn min_interval(&self) -> Duration {
        interval_units_to_duration(self.interval_min)
    }

    /// Maximum interval as a duration.
    pub fn max_interval(&self) -> Duration {
        interval_units_to_duration(self.interval_max)
    }

    /// Supervision timeout as a duration.
    pub fn timeout(&self) -> Duration {
        timeout_units_to_duration(self.supervision_timeout)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::INITIAL_CLIENT
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "interval {}-{} ms, latency {}, timeout {} ms",
            self.min_interval().as_micros() as f64 / 1000.0,
            self.max_interval().as_micros() as f64 / 1000.0,
            self.latency,
            self.timeout().as_millis()
        )
    }
}

/// Bounds a peer's parameter-update proposal must fall within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamBounds {
    /// Lowest acceptable `interval_min` (1.25 ms units).
    pub min_interval: u16,
    /// Highest acceptable `interval_max` (1.25 ms units).
    pub max_interval: u16,
    /// Highest acceptable latency.
    pub max_latency: u16,
    /// Highest acceptable supervision timeout (10 ms units).
    pub max_supervision_timeout: u16,
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            min_interval: 24,
            max_interval: 40,
            max_latency: 2,
            max_supervision_timeout: 100,
        }
    }
}

/// Decides whether to apply parameter updates proposed by a peer.
///
/// The same policy applies to every connection, whichever role proposed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionParameterNegotiator {
    bounds: ParamBounds,
}

impl ConnectionParameterNegotiator {
    /// Create a negotiator with custom bounds.
    pub fn new(bounds: ParamBounds) -> Self {
        Self { bounds }
    }

    /// The bounds in force.
    pub fn bounds(&self) -> &ParamBounds {
        &self.bounds
    }

    /// Return true to accept and apply the proposal, false to keep the
    /// current parameters.
    pub fn accepts(&self, proposal: &ConnectionParams) -> bool {
        let b = &self.bounds;
        if proposal.interval_min < b.min_interval {
            return false;
        }
        if proposal.interval_max > b.max_interval {
            return false;
        }
        if proposal.latency > b.max_latency {
            return false;
        }
        proposal.supervision_timeout <= b.max_supervision_timeout
    }
}
