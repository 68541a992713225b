//! Deduplicated, filterable list of discovered devices.

use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::data::device::DiscoveredDevice;

/// Default signal-strength floor for the "nearby only" filter, in dBm.
pub const DEFAULT_NEARBY_RSSI: i16 = -50;

/// User-selectable filters applied to the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFilter {
    /// Only show devices advertising the configured service UUID.
    pub require_service_uuid: bool,
    /// Only show devices whose current RSSI is at or above the threshold.
    pub nearby_only: bool,
    /// Only show devices that advertised a name at least once.
    pub require_name: bool,
}

impl ScanFilter {
    /// A filter that lets every device through.
    pub const NONE: Self = Self {
        require_service_uuid: false,
        nearby_only: false,
        require_name: false,
    };

    /// Create a filter.
    pub fn new(require_service_uuid: bool, nearby_only: bool, require_name: bool) -> Self {
        Self {
            require_service_uuid,
            nearby_only,
            require_name,
        }
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            require_service_uuid: true,
            nearby_only: false,
            require_name: true,
        }
    }
}

/// The scanner's device set.
///
/// Keeps every device heard during the scan in discovery order, plus the
/// filtered view published to observers. The filtered view is `None` until
/// the first filter pass, and again after [`DeviceStore::clear`].
#[derive(Debug, Clone)]
pub struct DeviceStore {
    service_uuid: Option<Uuid>,
    nearby_rssi: i16,
    filter: ScanFilter,
    devices: Vec<DiscoveredDevice>,
    filtered: Option<Vec<DiscoveredDevice>>,
}

impl DeviceStore {
    /// Create an empty store.
    ///
    /// `service_uuid` is the UUID the service filter matches against; with
    /// `None` the service filter always passes.
    pub fn new(service_uuid: Option<Uuid>, nearby_rssi: i16) -> Self {
        Self {
            service_uuid,
            nearby_rssi,
            filter: ScanFilter::default(),
            devices: Vec::new(),
            filtered: None,
        }
    }

    /// Start with the given filter instead of the default one.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the UUID used by the service filter.
    pub fn set_service_uuid(&mut self, uuid: Option<Uuid>) {
        self.service_uuid = uuid;
    }

    /// Get the UUID used by the service filter.
    pub fn service_uuid(&self) -> Option<Uuid> {
        self.service_uuid
    }

    /// Get the active filter.
    pub fn filter(&self) -> ScanFilter {
        self.filter
    }

    /// Record one advertisement.
    ///
    /// Returns `true` when the device satisfies the active filter now but
    /// did not before this advertisement (including brand-new devices).
    pub fn on_advertisement(&mut self, adv: &Advertisement) -> bool {
        let index = match self.index_of(&adv.address) {
            Some(index) => {
                let was_matching = self.matches(&self.devices[index]);
                self.devices[index].update(adv);
                if was_matching {
                    return false;
                }
                index
            }
            None => {
                self.devices.push(DiscoveredDevice::from_advertisement(adv));
                self.devices.len() - 1
            }
        };

        self.matches(&self.devices[index])
    }

    /// Record a batch of advertisements.
    ///
    /// Returns `true` if any of them produced a new match.
    pub fn on_batch(&mut self, advs: &[Advertisement]) -> bool {
        let mut found = false;
        for adv in advs {
            found |= self.on_advertisement(adv);
        }
        found
    }

    /// Replace the active filter and recompute the filtered view.
    pub fn apply_filter(&mut self, filter: ScanFilter) -> Vec<DiscoveredDevice> {
        self.filter = filter;
        self.refresh()
    }

    /// Recompute the filtered view with the active filter.
    pub fn refresh(&mut self) -> Vec<DiscoveredDevice> {
        let filtered: Vec<_> = self
            .devices
            .iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect();
        self.filtered = Some(filtered.clone());
        filtered
    }

    /// Check a device against the active filter.
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        self.matches_service(device) && self.matches_nearby(device) && self.matches_name(device)
    }

    fn matches_service(&self, device: &DiscoveredDevice) -> bool {
        match self.service_uuid {
            Some(uuid) if self.filter.require_service_uuid => device.advertises_service(&uuid),
            _ => true,
        }
    }

    fn matches_nearby(&self, device: &DiscoveredDevice) -> bool {
        !self.filter.nearby_only || device.rssi() >= self.nearby_rssi
    }

    fn matches_name(&self, device: &DiscoveredDevice) -> bool {
        !self.filter.require_name || device.had_name()
    }

    /// The last computed filtered view, or `None` if there is no data.
    pub fn filtered(&self) -> Option<&[DiscoveredDevice]> {
        self.filtered.as_deref()
    }

    /// Every device heard so far, in discovery order.
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Look up a device by address.
    pub fn get(&self, address: &str) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.address() == address)
    }

    /// Forget every device.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.filtered = None;
    }

    /// Number of devices heard so far.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device was heard.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn index_of(&self, address: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.address() == address)
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(None, DEFAULT_NEARBY_RSSI)
    }
}
