// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # nrf-blinky-ble
//!
//! A cross-platform Rust library for the Nordic LED Button Service (LBS),
//! the "Blinky" example peripheral of the nRF5 SDK and nRF Connect SDK.
//!
//! ## Features
//!
//! - **Device Discovery**: Scan for peripherals, deduplicated by address,
//!   with service, proximity and name filters
//! - **Connection Sessions**: Bounded connection retries, service
//!   validation, and orderly release
//! - **LED Control**: Turn the LED on and off, confirmed by read-back
//! - **Button Notifications**: Observe the button as it is pressed
//! - **Observable State**: Replay-latest streams of connection phase,
//!   LED and Button state
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nrf_blinky_ble::{Blinky, DeviceManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::new().await?;
//!     manager.start_scanning().await?;
//!
//!     // Wait for devices to be discovered
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     manager.stop_scanning().await?;
//!
//!     if let Some(device) = manager.devices().first() {
//!         println!("Connecting to {}", device);
//!
//!         let blinky = manager.connect(device.address()).await?;
//!         blinky.turn_led(true).await?;
//!         println!("Button pressed: {}", *blinky.button_state().borrow());
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. Devices are identified by a
//! platform UUID instead of their hardware address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod blinky;
pub mod config;
pub mod data;
pub mod device_manager;
pub mod error;
pub mod logging;
pub mod permissions;
pub mod protocol;
pub mod session;
pub mod state;

// Re-exports for convenience
pub use blinky::{Blinky, BlinkyManager};
pub use device_manager::{CallbackHandle, DeviceManager};
pub use error::{Error, Result};
pub use session::BlinkySession;

// Re-export commonly used types from submodules
pub use ble::connection::{BlinkyState, ConnectionPhase, DisconnectReason};
pub use ble::gatt::{BtleplugGatt, GattClient};
pub use ble::scanner::{BleScanner, ScanError, ScannerEvent, ScanningState};
pub use config::{BlinkyConfig, ConnectionConfig, LedConfirmation, ScannerConfig};
pub use data::{DeviceStore, DiscoveredDevice, ScanFilter};
pub use logging::{LogEntry, LogPriority, LogSink, ProtocolLogger};
pub use permissions::{GrantedPermissions, PermissionProvider};
pub use protocol::{ButtonState, LedState};
pub use state::ObservableState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<DeviceManager>();
        let _ = std::any::TypeId::of::<BlinkyManager>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<ConnectionPhase>();
        let _ = std::any::TypeId::of::<DiscoveredDevice>();
        let _ = std::any::TypeId::of::<ScanFilter>();
        let _ = std::any::TypeId::of::<BlinkyConfig>();
    }

    #[test]
    fn test_lbs_uuids() {
        assert_eq!(
            ble::BLINKY_SERVICE_UUID.to_string(),
            "00001523-1212-efde-1523-785feabcd123"
        );
        assert_eq!(
            ble::BLINKY_LED_CHARACTERISTIC_UUID.to_string(),
            "00001525-1212-efde-1523-785feabcd123"
        );
    }
}
