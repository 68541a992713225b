//! Protocol module for encoding and decoding characteristic values.
//!
//! The LED Button Service uses single-byte payloads on both of its
//! characteristics.

pub mod lbs;

pub use lbs::{decode_state, encode_led, ButtonState, LedState};
