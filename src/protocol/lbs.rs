//! LED Button Service payload encoding.
//!
//! Both characteristics carry a single byte: `0x00` for off/released and
//! `0x01` for on/pressed. Anything else is invalid.

use std::fmt;

use crate::error::{Error, Result};

/// Opcode written to the LED characteristic to turn the LED off.
pub const LED_OFF: u8 = 0x00;
/// Opcode written to the LED characteristic to turn the LED on.
pub const LED_ON: u8 = 0x01;

/// Size of every LBS payload in bytes.
pub const PAYLOAD_SIZE: usize = 1;

/// Encode the LED opcode for the requested state.
#[inline]
pub fn encode_led(on: bool) -> [u8; PAYLOAD_SIZE] {
    [if on { LED_ON } else { LED_OFF }]
}

/// Decode a one-byte boolean state.
///
/// # Errors
///
/// Returns [`Error::InvalidPayload`] when the data is not exactly one byte
/// equal to `0x00` or `0x01`.
pub fn decode_state(data: &[u8]) -> Result<bool> {
    match data {
        [LED_OFF] => Ok(false),
        [LED_ON] => Ok(true),
        [other] => Err(Error::InvalidPayload {
            context: format!("unexpected value 0x{:02X}", other),
        }),
        _ => Err(Error::InvalidPayload {
            context: format!(
                "expected {} byte, got {} ({:02X?})",
                PAYLOAD_SIZE,
                data.len(),
                data
            ),
        }),
    }
}

/// State of the LED on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LedState(pub bool);

impl LedState {
    /// Parse from a characteristic value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode_state(data).map(Self)
    }

    /// Convert to the wire opcode.
    pub fn to_bytes(self) -> [u8; PAYLOAD_SIZE] {
        encode_led(self.0)
    }

    /// Check if the LED is on.
    pub fn is_on(self) -> bool {
        self.0
    }
}

impl fmt::Display for LedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "ON" } else { "OFF" })
    }
}

/// State of the button on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ButtonState(pub bool);

impl ButtonState {
    /// Parse from a notification or read value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode_state(data).map(Self)
    }

    /// Check if the button is pressed.
    pub fn is_pressed(self) -> bool {
        self.0
    }
}

impl fmt::Display for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "pressed" } else { "released" })
    }
}
