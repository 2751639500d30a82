//! Advertisement reports and the filter that picks connection candidates.

use uuid::Uuid;

use crate::ble::uuids::CONFIGURATION_SERVICE_UUID;

/// Six-byte link-layer device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address([u8; 6]);

impl Address {
    /// Create from raw bytes, most significant first.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, most significant first.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl From<btleplug::api::BDAddr> for Address {
    fn from(addr: btleplug::api::BDAddr) -> Self {
        Self(addr.into_inner())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// A device seen in one advertisement report.
///
/// Lives only for the current scan unless a connect attempt picks it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedDevice {
    /// Link-layer address.
    pub address: Address,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Service UUIDs in the advertisement (and scan response).
    pub service_uuids: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl AdvertisedDevice {
    /// Create a report with no name or signal strength.
    pub fn new(address: Address, service_uuids: Vec<Uuid>) -> Self {
        Self {
            address,
            name: None,
            service_uuids,
            rssi: None,
        }
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the local name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check whether the device advertises a service.
    pub fn is_advertising_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }
}

impl std::fmt::Display for AdvertisedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name: {}, Address: {}", self.name.as_deref().unwrap_or(""), self.address)?;
        if let Some(rssi) = self.rssi {
            write!(f, ", RSSI: {}", rssi)?;
        }
        for uuid in &self.service_uuids {
            write!(f, ", serviceUUID: {}", uuid)?;
        }
        Ok(())
    }
}

/// Outcome of evaluating one advertisement report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not interesting.
    Ignore,
    /// Advertises the target service; connect to it.
    Candidate,
}

/// Matches advertisement reports against the target service signature.
#[derive(Debug, Clone)]
pub struct AdvertisementFilter {
    target_service: Uuid,
}

impl AdvertisementFilter {
    /// Create a filter for a service UUID.
    pub fn new(target_service: Uuid) -> Self {
        Self { target_service }
    }

    /// The UUID this filter looks for.
    pub fn target_service(&self) -> &Uuid {
        &self.target_service
    }

    /// Evaluate one report.
    pub fn evaluate(&self, device: &AdvertisedDevice) -> Verdict {
        if device.is_advertising_service(&self.target_service) {
            Verdict::Candidate
        } else {
            Verdict::Ignore
        }
    }
}

impl Default for AdvertisementFilter {
    fn default() -> Self {
        Self::new(CONFIGURATION_SERVICE_UUID)
    }
}
