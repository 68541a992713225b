//! BLE connection lifecycle.
//!
//! Connection phases, disconnect reasons, and the bounded retry loop used to
//! establish a link.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// Why a session ended up disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisconnectReason {
    /// The link was closed on request after the session was ready.
    Success,
    /// `release()` was called before the session became ready.
    UserCancelled,
    /// Every connection attempt timed out.
    Timeout,
    /// The link dropped, or an operation failed on an established link.
    LinkLoss,
    /// The peripheral lacks the required service or characteristics.
    Unsupported,
    /// The platform reported a failure without more detail.
    Unknown,
}

impl DisconnectReason {
    /// Whether a new `connect()` may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Whether this reason describes a failure shown to the user.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success | Self::UserCancelled)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::UserCancelled => write!(f, "cancelled"),
            Self::Timeout => write!(f, "timeout"),
            Self::LinkLoss => write!(f, "link loss"),
            Self::Unsupported => write!(f, "device not supported"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Phase of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionPhase {
    /// No connection was requested yet.
    #[default]
    Idle,
    /// Establishing the link.
    Connecting,
    /// Link is up; discovering services and reading initial values.
    Initializing,
    /// Fully initialized; characteristic I/O is allowed.
    Ready,
    /// Closing the link.
    Disconnecting,
    /// Not connected. Terminal until `connect()` is called again.
    Disconnected(DisconnectReason),
}

impl ConnectionPhase {
    /// Check if the session is ready for I/O.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Initializing)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Initializing | Self::Disconnecting
        )
    }

    /// Check if there is no link and none is being set up.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected(_))
    }

    /// Get the disconnect reason, if disconnected.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Disconnected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Collapse to the three states a UI cares about.
    pub fn simplified(&self) -> BlinkyState {
        match self {
            Self::Connecting | Self::Initializing => BlinkyState::Loading,
            Self::Ready => BlinkyState::Ready,
            Self::Idle | Self::Disconnecting | Self::Disconnected(_) => BlinkyState::NotAvailable,
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected(reason) => write!(f, "Disconnected ({})", reason),
        }
    }
}

/// Simplified device state for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlinkyState {
    /// Connecting or initializing.
    Loading,
    /// Ready for use.
    Ready,
    /// Not connected.
    #[default]
    NotAvailable,
}

/// Run `attempt` until it succeeds, up to `config.attempts` times.
///
/// Each attempt is bounded by `config.connect_timeout`; attempts are
/// separated by `config.retry_delay`. Cancelling `cancel` aborts the
/// current attempt or pause and returns [`Error::OperationCancelled`].
///
/// Returns the number of the attempt that succeeded.
///
/// # Errors
///
/// [`Error::ConnectionFailed`] once every attempt failed; its reason is
/// [`DisconnectReason::Timeout`] if the last attempt timed out.
pub async fn connect_with_retry<F, Fut>(
    config: &ConnectionConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let max_attempts = config.attempts.max(1);
    let mut reason = DisconnectReason::Unknown;

    for n in 1..=max_attempts {
        debug!("Connection attempt {} of {}", n, max_attempts);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::OperationCancelled),
            outcome = tokio::time::timeout(config.connect_timeout, attempt(n)) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                info!("Connected on attempt {}", n);
                return Ok(n);
            }
            Ok(Err(Error::OperationCancelled)) => return Err(Error::OperationCancelled),
            Ok(Err(e)) => {
                warn!("Connection attempt {} failed: {}", n, e);
                reason = DisconnectReason::Unknown;
            }
            Err(_) => {
                warn!(
                    "Connection attempt {} timed out after {:?}",
                    n, config.connect_timeout
                );
                reason = DisconnectReason::Timeout;
            }
        }

        if n < max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::OperationCancelled),
                _ = tokio::time::sleep(config.retry_delay) => {}
            }
        }
    }

    Err(Error::ConnectionFailed {
        attempts: max_attempts,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_connection_phase() {
        assert!(ConnectionPhase::Ready.is_ready());
        assert!(!ConnectionPhase::Initializing.is_ready());

        assert!(ConnectionPhase::Connecting.is_connecting());
        assert!(ConnectionPhase::Initializing.is_connecting());
        assert!(ConnectionPhase::Disconnecting.is_transitioning());
        assert!(!ConnectionPhase::Ready.is_transitioning());

        assert!(ConnectionPhase::Idle.is_disconnected());
        assert!(ConnectionPhase::Disconnected(DisconnectReason::LinkLoss).is_disconnected());
        assert_eq!(
            ConnectionPhase::Disconnected(DisconnectReason::Timeout).disconnect_reason(),
            Some(DisconnectReason::Timeout)
        );
    }

    #[test]
    fn test_simplified_state() {
        assert_eq!(ConnectionPhase::Connecting.simplified(), BlinkyState::Loading);
        assert_eq!(ConnectionPhase::Initializing.simplified(), BlinkyState::Loading);
        assert_eq!(ConnectionPhase::Ready.simplified(), BlinkyState::Ready);
        assert_eq!(
            ConnectionPhase::Disconnected(DisconnectReason::Success).simplified(),
            BlinkyState::NotAvailable
        );
    }

    #[test]
    fn test_disconnect_reason() {
        assert!(!DisconnectReason::Unsupported.is_retryable());
        assert!(DisconnectReason::LinkLoss.is_retryable());
        assert!(!DisconnectReason::UserCancelled.is_failure());
        assert!(DisconnectReason::Timeout.is_failure());
    }

    #[test]
    fn test_connection_phase_display() {
        assert_eq!(format!("{}", ConnectionPhase::Ready), "Ready");
        assert_eq!(
            format!("{}", ConnectionPhase::Disconnected(DisconnectReason::LinkLoss)),
            "Disconnected (link loss)"
        );
    }

    fn counting_attempts(
        fail_first: u32,
    ) -> (Arc<AtomicU32>, impl FnMut(u32) -> futures::future::Ready<Result<()>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempt = move |_n: u32| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(if call <= fail_first {
                Err(Error::Internal("refused".to_string()))
            } else {
                Ok(())
            })
        };
        (calls, attempt)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let (calls, attempt) = counting_attempts(2);
        let cancel = CancellationToken::new();

        let used = connect_with_retry(&ConnectionConfig::default(), &cancel, attempt)
            .await
            .unwrap();
        assert_eq!(used, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let (calls, attempt) = counting_attempts(u32::MAX);
        let cancel = CancellationToken::new();

        let err = connect_with_retry(&ConnectionConfig::default(), &cancel, attempt)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionFailed {
                attempts: 3,
                reason: DisconnectReason::Unknown
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout_is_per_attempt() {
        let config = ConnectionConfig::default();
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let err = connect_with_retry(&config, &cancel, |_| futures::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: DisconnectReason::Timeout,
                ..
            }
        ));
        // 3 timeouts plus 2 pauses.
        assert_eq!(
            started.elapsed(),
            config.connect_timeout * 3 + config.retry_delay * 2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = connect_with_retry(&ConnectionConfig::default(), &cancel, |_| {
            futures::future::pending()
        })
        .await
        .unwrap_err();
        assert!(err.is_cancellation());
    }
}
