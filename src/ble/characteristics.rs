//! LED Button Service characteristic handles.
//!
//! Resolves the LED and Button characteristics from a discovered service
//! table and checks that they support the operations the session needs.

use btleplug::api::{CharPropFlags, Characteristic, Service, WriteType};
use tracing::debug;
use uuid::Uuid;

use crate::ble::uuids::{
    BLINKY_BUTTON_CHARACTERISTIC_UUID, BLINKY_LED_CHARACTERISTIC_UUID, BLINKY_SERVICE_UUID,
};
use crate::error::{Error, Result};

/// The two characteristics of the LED Button Service.
///
/// Handles are only valid while the session that resolved them is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandles {
    /// LED characteristic (write, optionally read).
    pub led: Characteristic,
    /// Button characteristic (notify, optionally read).
    pub button: Characteristic,
}

impl CharacteristicHandles {
    /// Find and validate the LBS characteristics.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedDevice`] if the service is missing, either
    /// characteristic is missing, the Button cannot notify, or the LED
    /// cannot be written with response.
    pub fn resolve(services: &[Service]) -> Result<Self> {
        let service = services
            .iter()
            .find(|s| s.uuid == BLINKY_SERVICE_UUID)
            .ok_or_else(|| Error::UnsupportedDevice {
                reason: format!("service {} not found", BLINKY_SERVICE_UUID),
            })?;

        let find = |uuid: Uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| Error::UnsupportedDevice {
                    reason: format!("characteristic {} not found", uuid),
                })
        };

        let led = find(BLINKY_LED_CHARACTERISTIC_UUID)?;
        let button = find(BLINKY_BUTTON_CHARACTERISTIC_UUID)?;

        debug!(
            "LED properties: {:?}, Button properties: {:?}",
            led.properties, button.properties
        );

        if !button.properties.contains(CharPropFlags::NOTIFY) {
            return Err(Error::UnsupportedDevice {
                reason: "Button characteristic does not support notifications".to_string(),
            });
        }

        if !led.properties.contains(CharPropFlags::WRITE) {
            return Err(Error::UnsupportedDevice {
                reason: "LED characteristic does not support write requests".to_string(),
            });
        }

        Ok(Self { led, button })
    }

    /// Pick the write type for LED writes.
    pub fn led_write_type(&self, prefer_without_response: bool) -> WriteType {
        if prefer_without_response
            && self
                .led
                .properties
                .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        }
    }

    /// Whether the LED value can be read back.
    pub fn led_readable(&self) -> bool {
        self.led.properties.contains(CharPropFlags::READ)
    }

    /// Whether the Button value can be read.
    pub fn button_readable(&self) -> bool {
        self.button.properties.contains(CharPropFlags::READ)
    }
}
