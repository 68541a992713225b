//! Error types for the nrf-blinky-ble crate.

use thiserror::Error;

use crate::ble::connection::DisconnectReason;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A runtime permission required for scanning or connecting is missing.
    #[error("Permission not granted: {permission}")]
    PermissionDenied {
        /// The permission that is missing.
        permission: String,
    },

    /// The platform rejected the scan request.
    #[error("Scan could not be started: {reason}")]
    ScanStartFailed {
        /// Description of why the scan could not be started.
        reason: String,
    },

    /// All connection attempts failed.
    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        /// Number of attempts that were made.
        attempts: u32,
        /// Why the last attempt failed.
        reason: DisconnectReason,
    },

    /// The peripheral does not expose the LED Button Service as required.
    #[error("Device not supported: {reason}")]
    UnsupportedDevice {
        /// What is missing on the peripheral.
        reason: String,
    },

    /// A characteristic value did not match the expected encoding.
    #[error("Invalid data received: {context}")]
    InvalidPayload {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The operation was cancelled by `release()`.
    #[error("Operation cancelled")]
    OperationCancelled,

    /// `connect()` was called while the session was connecting or disconnecting.
    #[error("Session is busy connecting or disconnecting")]
    SessionBusy,

    /// Operation requires a connection but the session is not ready.
    #[error("Device not connected")]
    NotConnected,

    /// A GATT operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// No peripheral with the given address is known to the adapter.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is the normal unwind path of `release()`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::OperationCancelled)
    }

    /// Whether retrying the same operation against the same device can help.
    ///
    /// An unsupported device will not become supported by reconnecting, and
    /// a missing permission needs user action first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { reason, .. } => reason.is_retryable(),
            Self::Bluetooth(_)
            | Self::Timeout
            | Self::NotConnected
            | Self::SessionBusy
            | Self::ScanStartFailed { .. } => true,
            _ => false,
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        let err = Error::ConnectionFailed {
            attempts: 3,
            reason: DisconnectReason::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "Connection failed after 3 attempt(s): timeout"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ConnectionFailed {
            attempts: 3,
            reason: DisconnectReason::LinkLoss,
        }
        .is_retryable());
        assert!(!Error::ConnectionFailed {
            attempts: 1,
            reason: DisconnectReason::Unsupported,
        }
        .is_retryable());
        assert!(!Error::UnsupportedDevice {
            reason: "no LBS".to_string()
        }
        .is_retryable());
        assert!(!Error::PermissionDenied {
            permission: "BLUETOOTH_SCAN".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_cancellation() {
        assert!(Error::OperationCancelled.is_cancellation());
        assert!(!Error::Timeout.is_cancellation());
    }
}
