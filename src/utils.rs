//! Utility functions for the dual-role-ble crate.

use std::time::Duration;

/// Convert a connection interval in 1.25 ms units to a duration.
///
/// # Example
///
/// ```
/// use dual_role_ble::utils::interval_units_to_duration;
/// use std::time::Duration;
///
/// assert_eq!(interval_units_to_duration(24), Duration::from_millis(30));
/// ```
#[inline]
pub fn interval_units_to_duration(units: u16) -> Duration {
    Duration::from_micros(units as u64 * 1250)
}

/// Convert a supervision timeout in 10 ms units to a duration.
#[inline]
pub fn timeout_units_to_duration(units: u16) -> Duration {
    Duration::from_millis(units as u64 * 10)
}

/// Render an attribute value for logs: UTF-8 text when printable, hex otherwise.
pub fn display_value(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => format!("{:02X?}", data),
    }
}
