//! Discovered peripheral data structures.
//!
//! A [`DiscoveredDevice`] is one peripheral observed while scanning. Its
//! identity is the address; every other field changes as new
//! advertisements arrive.

use std::hash::{Hash, Hasher};
use std::time::Instant;

use uuid::Uuid;

use crate::ble::advertising::Advertisement;

/// A peripheral observed during a scan.
///
/// Equality and hashing use the address only, so a device updated in place
/// stays the same entry in any set or map keyed by it.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Hardware address (or platform identifier). Never changes.
    address: String,
    /// Last advertised name that was not empty.
    name: Option<String>,
    /// Whether any advertisement ever carried a name.
    had_name: bool,
    /// RSSI of the latest advertisement.
    rssi: i16,
    /// RSSI of the advertisement before the latest one.
    previous_rssi: i16,
    /// Highest RSSI observed during this scan.
    highest_rssi: i16,
    /// Service UUIDs of the latest advertisement.
    service_uuids: Vec<Uuid>,
    /// When the latest advertisement was received.
    last_seen: Instant,
}

impl DiscoveredDevice {
    /// Create a device from its first advertisement.
    pub fn from_advertisement(adv: &Advertisement) -> Self {
        Self {
            address: adv.address.clone(),
            name: adv.name.clone(),
            had_name: adv.name.is_some(),
            rssi: adv.rssi,
            previous_rssi: adv.rssi,
            highest_rssi: adv.rssi,
            service_uuids: adv.service_uuids.clone(),
            last_seen: Instant::now(),
        }
    }

    /// Apply a subsequent advertisement from the same address.
    ///
    /// The RSSI is always recorded. The name is only replaced when the new
    /// advertisement carries one.
    pub(crate) fn update(&mut self, adv: &Advertisement) {
        debug_assert_eq!(self.address, adv.address);

        if let Some(name) = adv.name.as_ref().filter(|n| !n.is_empty()) {
            self.name = Some(name.clone());
            self.had_name = true;
        }

        self.previous_rssi = self.rssi;
        self.rssi = adv.rssi;
        self.highest_rssi = self.highest_rssi.max(adv.rssi);
        self.service_uuids = adv.service_uuids.clone();
        self.last_seen = Instant::now();
    }

    /// Get the address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the most recent non-empty advertised name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether any advertisement from this device carried a name.
    pub fn had_name(&self) -> bool {
        self.had_name
    }

    /// Get the current signal strength (dBm).
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    /// Get the signal strength before the latest advertisement.
    pub fn previous_rssi(&self) -> i16 {
        self.previous_rssi
    }

    /// Get the highest signal strength observed.
    pub fn highest_rssi(&self) -> i16 {
        self.highest_rssi
    }

    /// Get the service UUIDs of the latest advertisement.
    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    /// Check whether the latest advertisement listed the given service.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }

    /// Get the time the latest advertisement was received.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Name to show to a user, if the device ever advertised one.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Name to show to a user, falling back to the address.
    pub fn display_name_or_address(&self) -> &str {
        self.display_name().unwrap_or(&self.address)
    }
}

impl PartialEq for DiscoveredDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DiscoveredDevice {}

impl Hash for DiscoveredDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl std::fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {} dBm)",
            self.display_name_or_address(),
            self.address,
            self.rssi
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_first_advertisement() {
        let adv = Advertisement::new(ADDRESS, Some("Blinky".to_string()), -60);
        let device = DiscoveredDevice::from_advertisement(&adv);

        assert_eq!(device.address(), ADDRESS);
        assert_eq!(device.name(), Some("Blinky"));
        assert!(device.had_name());
        assert_eq!(device.rssi(), -60);
        assert_eq!(device.previous_rssi(), -60);
        assert_eq!(device.highest_rssi(), -60);
    }

    #[test]
    fn test_update_shifts_rssi() {
        let mut device = DiscoveredDevice::from_advertisement(&Advertisement::new(ADDRESS, None, -60));
        device.update(&Advertisement::new(ADDRESS, None, -45));
        device.update(&Advertisement::new(ADDRESS, None, -80));

        assert_eq!(device.rssi(), -80);
        assert_eq!(device.previous_rssi(), -45);
        assert_eq!(device.highest_rssi(), -45);
    }

    #[test]
    fn test_name_is_sticky() {
        let mut device = DiscoveredDevice::from_advertisement(&Advertisement::new(ADDRESS, None, -60));
        assert!(device.display_name().is_none());
        assert_eq!(device.display_name_or_address(), ADDRESS);

        device.update(&Advertisement::new(ADDRESS, Some("Nordic_Blinky".to_string()), -61));
        device.update(&Advertisement::new(ADDRESS, None, -62));

        assert_eq!(device.display_name(), Some("Nordic_Blinky"));
        assert!(device.had_name());
        assert_eq!(device.rssi(), -62);
    }

    #[test]
    fn test_equality_by_address_only() {
        let a = DiscoveredDevice::from_advertisement(&Advertisement::new(ADDRESS, None, -60));
        let mut b = DiscoveredDevice::from_advertisement(&Advertisement::new(
            ADDRESS,
            Some("Other".to_string()),
            -30,
        ));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        b.update(&Advertisement::new(ADDRESS, None, -90));
        assert!(set.contains(&b));

        let c = DiscoveredDevice::from_advertisement(&Advertisement::new("11:22:33:44:55:66", None, -60));
        assert_ne!(a, c);
    }
}
