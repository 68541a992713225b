//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUIDs of the Nordic LED Button Service (LBS).

use uuid::Uuid;

/// Nordic LED Button Service UUID.
pub const BLINKY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1523_1212_efde_1523_785feabcd123);
/// Button characteristic UUID (Read, Notify).
pub const BLINKY_BUTTON_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1524_1212_efde_1523_785feabcd123);
/// LED characteristic UUID (Read, Write).
pub const BLINKY_LED_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1525_1212_efde_1523_785feabcd123);

/// Check if a service UUID is the LED Button Service.
pub fn is_blinky_service(uuid: &Uuid) -> bool {
    *uuid == BLINKY_SERVICE_UUID
}

/// Check if a characteristic UUID belongs to the LED Button Service.
pub fn is_blinky_characteristic(uuid: &Uuid) -> bool {
    *uuid == BLINKY_BUTTON_CHARACTERISTIC_UUID || *uuid == BLINKY_LED_CHARACTERISTIC_UUID
}
