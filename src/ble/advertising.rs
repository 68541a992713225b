//! Advertisement events.
//!
//! Normalizes the platform's per-peripheral advertisement properties into
//! the small record the scanner works with.

use btleplug::api::{BDAddr, PeripheralProperties};
use uuid::Uuid;

/// One received advertisement (or scan response) from a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Hardware address, or the platform identifier where addresses are hidden.
    pub address: String,
    /// Advertised local name, if this packet carried one.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Service UUIDs listed in the advertisement. Empty when the packet
    /// had no service data at all.
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    /// Create an advertisement record.
    pub fn new(address: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            service_uuids: Vec::new(),
        }
    }

    /// Attach the advertised service UUIDs.
    pub fn with_services(mut self, service_uuids: Vec<Uuid>) -> Self {
        self.service_uuids = service_uuids;
        self
    }

    /// Build from platform properties.
    ///
    /// `fallback_id` is used as the address on platforms that do not expose
    /// the hardware address (CoreBluetooth reports `00:00:00:00:00:00`).
    /// Returns `None` when the properties carry no RSSI, which happens for
    /// cached peripherals that were not actually heard during this scan.
    pub fn from_properties(fallback_id: &str, properties: &PeripheralProperties) -> Option<Self> {
        let rssi = properties.rssi?;

        let address = if properties.address == BDAddr::default() {
            fallback_id.to_string()
        } else {
            properties.address.to_string()
        };

        let name = properties
            .local_name
            .as_ref()
            .filter(|n| !n.is_empty())
            .cloned();

        Some(Self {
            address,
            name,
            rssi,
            service_uuids: properties.services.clone(),
        })
    }

    /// Check whether the advertisement lists the given service.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }
}
