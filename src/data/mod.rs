//! Data structures for scan results.
//!
//! This module contains the discovered-device record and the deduplicated,
//! filterable device list the scanner maintains.

pub mod device;
pub mod devices;

pub use device::DiscoveredDevice;
pub use devices::{DeviceStore, ScanFilter, DEFAULT_NEARBY_RSSI};
