//! Blinky capability interface.
//!
//! [`Blinky`] is what an application needs from a connected LED Button
//! device. [`BlinkySession`] implements it; [`BlinkyManager`] wraps any
//! implementation and forwards every call to it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::ble::connection::{BlinkyState, ConnectionPhase};
use crate::ble::gatt::GattClient;
use crate::error::Result;
use crate::logging::LogPriority;
use crate::session::BlinkySession;

#[cfg(test)]
use mockall::automock;

/// Operations and observable state of a Blinky device.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Blinky: Send + Sync {
    /// Connect and initialize the device.
    async fn connect(&self) -> Result<()>;

    /// Disconnect, or cancel a pending connection.
    async fn release(&self) -> Result<()>;

    /// Turn the LED on or off.
    async fn turn_led(&self, on: bool) -> Result<()>;

    /// Watch the connection phase.
    fn state(&self) -> watch::Receiver<ConnectionPhase>;

    /// Watch the LED state.
    fn led_state(&self) -> watch::Receiver<bool>;

    /// Watch the Button state.
    fn button_state(&self) -> watch::Receiver<bool>;

    /// Address of the device.
    fn address(&self) -> String;

    /// Log a protocol event for this device.
    fn log(&self, priority: LogPriority, message: &str);
}

#[async_trait]
impl<G: GattClient> Blinky for BlinkySession<G> {
    async fn connect(&self) -> Result<()> {
        BlinkySession::connect(self).await
    }

    async fn release(&self) -> Result<()> {
        BlinkySession::release(self).await
    }

    async fn turn_led(&self, on: bool) -> Result<()> {
        BlinkySession::turn_led(self, on).await
    }

    fn state(&self) -> watch::Receiver<ConnectionPhase> {
        self.subscribe_state()
    }

    fn led_state(&self) -> watch::Receiver<bool> {
        self.subscribe_led()
    }

    fn button_state(&self) -> watch::Receiver<bool> {
        self.subscribe_button()
    }

    fn address(&self) -> String {
        BlinkySession::address(self)
    }

    fn log(&self, priority: LogPriority, message: &str) {
        BlinkySession::log(self, priority, message)
    }
}

/// Handle to a Blinky device.
///
/// Cheap to clone; all clones share the same underlying device.
#[derive(Clone)]
pub struct BlinkyManager {
    blinky: Arc<dyn Blinky>,
}

impl BlinkyManager {
    /// Wrap an implementation.
    pub fn new(blinky: impl Blinky + 'static) -> Self {
        Self {
            blinky: Arc::new(blinky),
        }
    }

    /// Wrap a shared implementation.
    pub fn from_arc(blinky: Arc<dyn Blinky>) -> Self {
        Self { blinky }
    }

    /// Whether both handles refer to the same underlying device.
    pub fn is_same_device(&self, other: &BlinkyManager) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.blinky) as *const u8,
            Arc::as_ptr(&other.blinky) as *const u8,
        )
    }

    /// Current state, collapsed to [`BlinkyState`].
    pub fn simplified_state(&self) -> BlinkyState {
        self.blinky.state().borrow().simplified()
    }

    /// Stream of [`BlinkyState`], starting with the current one.
    ///
    /// Consecutive phases that map to the same state are reported once.
    pub fn simplified_state_stream(&self) -> impl Stream<Item = BlinkyState> + Send + 'static {
        let mut last = None;
        WatchStream::new(self.blinky.state()).filter_map(move |phase| {
            let state = phase.simplified();
            let changed = last.replace(state) != Some(state);
            futures::future::ready(changed.then_some(state))
        })
    }
}

#[async_trait]
impl Blinky for BlinkyManager {
    async fn connect(&self) -> Result<()> {
        self.blinky.connect().await
    }

    async fn release(&self) -> Result<()> {
        self.blinky.release().await
    }

    async fn turn_led(&self, on: bool) -> Result<()> {
        self.blinky.turn_led(on).await
    }

    fn state(&self) -> watch::Receiver<ConnectionPhase> {
        self.blinky.state()
    }

    fn led_state(&self) -> watch::Receiver<bool> {
        self.blinky.led_state()
    }

    fn button_state(&self) -> watch::Receiver<bool> {
        self.blinky.button_state()
    }

    fn address(&self) -> String {
        self.blinky.address()
    }

    fn log(&self, priority: LogPriority, message: &str) {
        self.blinky.log(priority, message)
    }
}

impl fmt::Debug for BlinkyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlinkyManager")
            .field("address", &self.blinky.address())
            .field("phase", &*self.blinky.state().borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::DisconnectReason;
    use crate::ble::gatt::fake::FakeGatt;
    use crate::config::ConnectionConfig;
    use crate::error::Error;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_manager_forwards_calls() {
        let mut mock = MockBlinky::new();
        mock.expect_turn_led()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_release()
            .times(1)
            .returning(|| Err(Error::NotConnected));
        mock.expect_state()
            .returning(|| watch::channel(ConnectionPhase::Initializing).1);
        mock.expect_address()
            .return_const("AA:BB:CC:DD:EE:FF".to_string());

        let manager = BlinkyManager::new(mock);

        manager.turn_led(true).await.unwrap();
        assert!(matches!(manager.release().await, Err(Error::NotConnected)));
        assert_eq!(manager.simplified_state(), BlinkyState::Loading);
        assert_eq!(manager.address(), "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_over_session() {
        let manager = BlinkyManager::new(BlinkySession::new(
            FakeGatt::new(),
            ConnectionConfig::default(),
        ));
        assert_eq!(manager.simplified_state(), BlinkyState::NotAvailable);

        manager.connect().await.unwrap();
        assert_eq!(manager.simplified_state(), BlinkyState::Ready);

        manager.turn_led(true).await.unwrap();
        assert!(*manager.led_state().borrow());

        let clone = manager.clone();
        assert!(clone.is_same_device(&manager));
        clone.release().await.unwrap();
        assert_eq!(
            *manager.state().borrow(),
            ConnectionPhase::Disconnected(DisconnectReason::Success)
        );
        assert_eq!(manager.simplified_state(), BlinkyState::NotAvailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simplified_state_stream() {
        let manager = BlinkyManager::new(BlinkySession::new(
            FakeGatt::new(),
            ConnectionConfig::default(),
        ));
        let mut states = Box::pin(manager.simplified_state_stream());

        assert_eq!(states.next().await, Some(BlinkyState::NotAvailable));

        manager.connect().await.unwrap();
        assert_eq!(states.next().await, Some(BlinkyState::Ready));
    }
}
