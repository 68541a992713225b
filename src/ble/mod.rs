//! BLE communication module.
//!
//! Scanning, the GATT client seam, connection lifecycle types, and the
//! LED Button Service UUIDs.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod gatt;
pub mod scanner;
pub mod uuids;

pub use advertising::Advertisement;
pub use characteristics::CharacteristicHandles;
pub use connection::{BlinkyState, ConnectionPhase, DisconnectReason};
pub use gatt::{BtleplugGatt, GattClient, GattEvent, GattEventStream};
pub use scanner::{
    AdapterScanBackend, AdvertisementStream, BleScanner, ScanBackend, ScanError, ScannerEvent,
    ScanningState,
};
pub use uuids::*;
