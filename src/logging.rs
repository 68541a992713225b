//! Protocol event logging.
//!
//! Every protocol-relevant event goes through `tracing`. Applications that
//! keep their own audit trail (a log viewer, a file) can additionally
//! install a [`LogSink`] on a session.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

/// Priority of a protocol log line.
///
/// `Application` sits between `Info` and `Warn` and marks events that are
/// meaningful to the user of the app (button pressed, LED turned on) rather
/// than to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogPriority {
    /// Very detailed protocol traces.
    #[default]
    Verbose,
    /// Debug information.
    Debug,
    /// Lifecycle milestones.
    Info,
    /// Application-level events.
    Application,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

impl LogPriority {
    /// Get a short label for this priority.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verbose => "V",
            Self::Debug => "D",
            Self::Info => "I",
            Self::Application => "A",
            Self::Warn => "W",
            Self::Error => "E",
        }
    }
}

impl fmt::Display for LogPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One line forwarded to a [`LogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Priority of the event.
    pub priority: LogPriority,
    /// Address of the peripheral the event concerns.
    pub address: String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.priority,
            self.address,
            self.message
        )
    }
}

/// External receiver of protocol log lines.
pub trait LogSink: Send + Sync {
    /// Receive one entry. Must not block.
    fn log(&self, entry: &LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(&LogEntry) + Send + Sync,
{
    fn log(&self, entry: &LogEntry) {
        self(entry)
    }
}

/// Routes protocol events to `tracing` and to an optional sink.
#[derive(Clone, Default)]
pub struct ProtocolLogger {
    address: String,
    sink: Option<Arc<dyn LogSink>>,
    min_priority: LogPriority,
}

impl ProtocolLogger {
    /// Create a logger for the given peripheral.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            sink: None,
            min_priority: LogPriority::Verbose,
        }
    }

    /// Install an external sink.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the lowest priority forwarded to the sink.
    pub fn with_min_priority(mut self, priority: LogPriority) -> Self {
        self.min_priority = priority;
        self
    }

    /// Get the lowest priority forwarded to the sink.
    pub fn min_priority(&self) -> LogPriority {
        self.min_priority
    }

    /// Log a protocol event.
    pub fn log(&self, priority: LogPriority, message: &str) {
        let address = self.address.as_str();
        match priority {
            LogPriority::Verbose => trace!(%address, "{}", message),
            LogPriority::Debug => debug!(%address, "{}", message),
            LogPriority::Info | LogPriority::Application => info!(%address, "{}", message),
            LogPriority::Warn => warn!(%address, "{}", message),
            LogPriority::Error => error!(%address, "{}", message),
        }

        if priority < self.min_priority {
            return;
        }

        if let Some(sink) = &self.sink {
            sink.log(&LogEntry {
                timestamp: Utc::now(),
                priority,
                address: self.address.clone(),
                message: message.to_string(),
            });
        }
    }
}

impl fmt::Debug for ProtocolLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolLogger")
            .field("address", &self.address)
            .field("has_sink", &self.sink.is_some())
            .field("min_priority", &self.min_priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting_logger(min: LogPriority) -> (ProtocolLogger, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink_entries = entries.clone();
        let sink = move |entry: &LogEntry| sink_entries.lock().push(entry.clone());
        let logger = ProtocolLogger::new("AA:BB:CC:DD:EE:FF")
            .with_sink(Arc::new(sink))
            .with_min_priority(min);
        (logger, entries)
    }

    #[test]
    fn test_priority_ordering() {
        assert!(LogPriority::Verbose < LogPriority::Debug);
        assert!(LogPriority::Info < LogPriority::Application);
        assert!(LogPriority::Application < LogPriority::Warn);
        assert!(LogPriority::Warn < LogPriority::Error);
    }

    #[test]
    fn test_sink_receives_entries() {
        let (logger, entries) = collecting_logger(LogPriority::Verbose);
        logger.log(LogPriority::Application, "Button pressed");

        let entries = entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, LogPriority::Application);
        assert_eq!(entries[0].address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(entries[0].message, "Button pressed");
    }

    #[test]
    fn test_min_priority_filters_sink() {
        let (logger, entries) = collecting_logger(LogPriority::Info);
        logger.log(LogPriority::Debug, "dropped");
        logger.log(LogPriority::Warn, "kept");

        let entries = entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }

    #[test]
    fn test_logger_without_sink() {
        let logger = ProtocolLogger::new("AA:BB:CC:DD:EE:FF");
        logger.log(LogPriority::Error, "no sink installed");
        assert_eq!(logger.min_priority(), LogPriority::Verbose);
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            priority: LogPriority::Warn,
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            message: "Invalid data received".to_string(),
        };
        let line = entry.to_string();
        assert!(line.contains(" W [AA:BB:CC:DD:EE:FF] Invalid data received"));
    }
}
