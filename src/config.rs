//! Connection and scanner configuration.
//!
//! Defaults match the behaviour of the nRF Blinky apps: three connection
//! attempts 300 ms apart, a 3 second timeout per attempt, no auto-connect,
//! and a scanner that filters on the LED Button Service.

use std::time::Duration;

use uuid::Uuid;

use crate::ble::uuids::BLINKY_SERVICE_UUID;
use crate::data::devices::{ScanFilter, DEFAULT_NEARBY_RSSI};
use crate::error::{Error, Result};

/// How the session confirms an LED write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LedConfirmation {
    /// Publish the requested state as soon as the write completes.
    Optimistic,
    /// Read the characteristic back after writing and publish what was read.
    #[default]
    ReadBack,
}

/// Settings for a connection session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionConfig {
    /// Total number of connection attempts (at least 1).
    pub attempts: u32,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Timeout of a single attempt.
    pub connect_timeout: Duration,
    /// Let the platform reconnect silently after link loss. Off by default
    /// so every reconnect goes through `connect()`.
    pub auto_connect: bool,
    /// Write the LED without response when the characteristic allows it.
    pub prefer_write_without_response: bool,
    /// How LED writes are confirmed.
    pub led_confirmation: LedConfirmation,
}

impl ConnectionConfig {
    /// Default number of connection attempts.
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    /// Default pause between attempts.
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);
    /// Default per-attempt timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Set the number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Choose the LED write type preference.
    pub fn with_write_without_response(mut self, prefer: bool) -> Self {
        self.prefer_write_without_response = prefer;
        self
    }

    /// Choose how LED writes are confirmed.
    pub fn with_led_confirmation(mut self, confirmation: LedConfirmation) -> Self {
        self.led_confirmation = confirmation;
        self
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(Error::InvalidConfig {
                field: "attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                field: "connect_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            auto_connect: false,
            prefer_write_without_response: true,
            led_confirmation: LedConfirmation::default(),
        }
    }
}

/// Settings for the device scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScannerConfig {
    /// Service UUID the service filter matches against.
    pub service_uuid: Option<Uuid>,
    /// RSSI floor of the "nearby only" filter, in dBm.
    pub nearby_rssi: i16,
    /// Batch period. Zero delivers every advertisement as it arrives.
    pub report_delay: Duration,
    /// Filter applied until the caller picks another one.
    pub filter: ScanFilter,
}

impl ScannerConfig {
    /// Set the service filter UUID.
    pub fn with_service_uuid(mut self, uuid: Option<Uuid>) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set the nearby threshold.
    pub fn with_nearby_rssi(mut self, rssi: i16) -> Self {
        self.nearby_rssi = rssi;
        self
    }

    /// Set the batch period.
    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.report_delay = delay;
        self
    }

    /// Set the initial filter.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Whether advertisements are delivered in batches.
    pub fn is_batched(&self) -> bool {
        !self.report_delay.is_zero()
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if !(-127..=20).contains(&self.nearby_rssi) {
            return Err(Error::InvalidConfig {
                field: "nearby_rssi",
                reason: format!("{} dBm is outside -127..=20", self.nearby_rssi),
            });
        }
        Ok(())
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            service_uuid: Some(BLINKY_SERVICE_UUID),
            nearby_rssi: DEFAULT_NEARBY_RSSI,
            report_delay: Duration::ZERO,
            filter: ScanFilter::default(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlinkyConfig {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Scanner settings.
    pub scanner: ScannerConfig,
}

impl BlinkyConfig {
    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.scanner.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(!config.auto_connect);
        assert!(config.prefer_write_without_response);
        assert_eq!(config.led_confirmation, LedConfirmation::ReadBack);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_validation() {
        let config = ConnectionConfig::default().with_attempts(0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { field: "attempts", .. })
        ));

        let config = ConnectionConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scanner_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.service_uuid, Some(BLINKY_SERVICE_UUID));
        assert_eq!(config.nearby_rssi, -50);
        assert!(!config.is_batched());
        assert!(config.filter.require_service_uuid);
        assert!(!config.filter.nearby_only);
        assert!(config.filter.require_name);
    }

    #[test]
    fn test_scanner_validation() {
        assert!(ScannerConfig::default().with_nearby_rssi(-200).validate().is_err());
        assert!(ScannerConfig::default()
            .with_report_delay(Duration::from_millis(500))
            .is_batched());
    }

    #[test]
    fn test_blinky_config_validate() {
        let mut config = BlinkyConfig::default();
        assert!(config.validate().is_ok());
        config.connection.attempts = 0;
        assert!(config.validate().is_err());
    }
}
