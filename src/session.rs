//! Connection session for one Blinky peripheral.
//!
//! A [`BlinkySession`] owns the GATT link to a single device. It connects
//! with bounded retries, validates the LED Button Service, reads the
//! initial LED and Button values, and then serves LED writes and Button
//! notifications until it is released or the link drops.
//!
//! Characteristic I/O goes through a FIFO operation queue, so at most one
//! GATT request per session is in flight. `release()` and link loss cancel
//! whatever is queued or running.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandles;
use crate::ble::connection::{connect_with_retry, BlinkyState, ConnectionPhase, DisconnectReason};
use crate::ble::gatt::{GattClient, GattEvent};
use crate::ble::uuids::BLINKY_BUTTON_CHARACTERISTIC_UUID;
use crate::config::{ConnectionConfig, LedConfirmation};
use crate::error::{Error, Result};
use crate::logging::{LogPriority, ProtocolLogger};
use crate::protocol::{decode_state, encode_led, ButtonState, LedState};
use crate::state::ObservableState;

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::OperationCancelled),
        result = fut => result,
    }
}

struct Inner<G> {
    gatt: G,
    config: ConnectionConfig,
    logger: ProtocolLogger,
    phase: ObservableState<ConnectionPhase>,
    led: ObservableState<bool>,
    /// Whether `led` reflects the device or is only the initial default.
    led_known: AtomicBool,
    button: ObservableState<bool>,
    /// Valid only while the phase is `Initializing` or `Ready`.
    handles: RwLock<Option<CharacteristicHandles>>,
    supported: AtomicBool,
    /// Serializes characteristic I/O; tokio's mutex is fair, so waiters run
    /// in FIFO order.
    ops: tokio::sync::Mutex<()>,
    /// Held by `connect()` until its attempt is established or unwound.
    attempt: tokio::sync::Mutex<()>,
    /// Token of the current connection; replaced on every `connect()`.
    cancel: Mutex<CancellationToken>,
    /// Guards phase transitions that race between release, link loss and
    /// the end of initialization.
    lifecycle: Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<G: GattClient> Inner<G> {
    fn log(&self, priority: LogPriority, message: &str) {
        self.logger.log(priority, message);
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    fn ready_handles(&self) -> Option<CharacteristicHandles> {
        if !self.phase.get().is_ready() {
            return None;
        }
        self.handles.read().clone()
    }

    fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    async fn clear_cache_if_unsupported(&self) {
        if self.supported.load(Ordering::SeqCst) {
            return;
        }
        self.log(LogPriority::Debug, "Clearing service cache");
        if let Err(e) = self.gatt.clear_cache().await {
            warn!("Failed to clear service cache: {}", e);
        }
    }

    fn on_notification(&self, uuid: Uuid, value: &[u8]) {
        if uuid != BLINKY_BUTTON_CHARACTERISTIC_UUID {
            trace!("Ignoring notification from {}", uuid);
            return;
        }
        if self.handles.read().is_none() {
            trace!("Ignoring Button notification outside of a session");
            return;
        }

        match decode_state(value) {
            Ok(pressed) => {
                self.log(
                    LogPriority::Application,
                    &format!("Button {}", ButtonState(pressed)),
                );
                self.button.set(pressed);
            }
            Err(e) => self.log(LogPriority::Warn, &e.to_string()),
        }
    }

    async fn on_link_loss(&self, cancel: &CancellationToken) {
        {
            let _guard = self.lifecycle.lock();
            if cancel.is_cancelled() {
                return;
            }
            cancel.cancel();
            *self.handles.write() = None;
            self.phase
                .set(ConnectionPhase::Disconnected(DisconnectReason::LinkLoss));
        }

        self.log(LogPriority::Warn, "Link lost");
        self.clear_cache_if_unsupported().await;
    }

    /// Tear an established session down after a failed read or write.
    async fn fail_link(&self, cancel: &CancellationToken, error: &Error) {
        {
            let _guard = self.lifecycle.lock();
            if cancel.is_cancelled() {
                return;
            }
            cancel.cancel();
            *self.handles.write() = None;
            self.phase.set(ConnectionPhase::Disconnecting);
        }

        self.log(LogPriority::Error, &format!("Operation failed: {}", error));
        self.stop_listener();
        if let Err(e) = self.gatt.disconnect().await {
            debug!("Disconnect after failure: {}", e);
        }
        self.clear_cache_if_unsupported().await;
        self.phase
            .set(ConnectionPhase::Disconnected(DisconnectReason::LinkLoss));
    }
}

/// Connection session for one Blinky peripheral.
///
/// Dropping the session cancels anything in flight but does not close the
/// link; call [`BlinkySession::release`] for an orderly disconnect.
pub struct BlinkySession<G: GattClient> {
    inner: Arc<Inner<G>>,
}

impl<G: GattClient> BlinkySession<G> {
    /// Create a session that logs through `tracing` only.
    pub fn new(gatt: G, config: ConnectionConfig) -> Self {
        let logger = ProtocolLogger::new(gatt.address());
        Self::with_logger(gatt, config, logger)
    }

    /// Create a session with a custom protocol logger.
    pub fn with_logger(gatt: G, config: ConnectionConfig, logger: ProtocolLogger) -> Self {
        Self {
            inner: Arc::new(Inner {
                gatt,
                config,
                logger,
                phase: ObservableState::default(),
                led: ObservableState::new(false),
                led_known: AtomicBool::new(false),
                button: ObservableState::new(false),
                handles: RwLock::new(None),
                supported: AtomicBool::new(false),
                ops: tokio::sync::Mutex::new(()),
                attempt: tokio::sync::Mutex::new(()),
                cancel: Mutex::new(CancellationToken::new()),
                lifecycle: Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Address of the peripheral.
    pub fn address(&self) -> String {
        self.inner.gatt.address()
    }

    /// Get the GATT client.
    pub fn gatt(&self) -> &G {
        &self.inner.gatt
    }

    /// Get the connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Connect and initialize.
    ///
    /// Resolves once the session is [`ConnectionPhase::Ready`]. Returns
    /// immediately if it already is.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionFailed`] when every attempt failed.
    /// - [`Error::UnsupportedDevice`] when validation failed.
    /// - [`Error::OperationCancelled`] when `release()` was called meanwhile.
    /// - [`Error::SessionBusy`] when another connect or a disconnect is running.
    ///
    /// In every case the phase ends up `Disconnected` with a reason.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;

        let (cancel, _attempt) = {
            let _guard = inner.lifecycle.lock();
            match inner.phase.get() {
                ConnectionPhase::Ready => return Ok(()),
                phase if phase.is_transitioning() => return Err(Error::SessionBusy),
                _ => {}
            }
            // A cancelled attempt may still be unwinding.
            let attempt = inner.attempt.try_lock().map_err(|_| Error::SessionBusy)?;
            let token = CancellationToken::new();
            *inner.cancel.lock() = token.clone();
            inner.led_known.store(false, Ordering::SeqCst);
            inner.phase.set(ConnectionPhase::Connecting);
            (token, attempt)
        };

        inner.log(LogPriority::Info, "Connecting...");

        match self.establish(&cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.unwind(&cancel, &e).await;
                let lost = inner.phase.get().disconnect_reason() == Some(DisconnectReason::LinkLoss);
                if e.is_cancellation() && lost {
                    Err(Error::NotConnected)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        let gatt = &inner.gatt;
        let logger = &inner.logger;
        let auto_connect = inner.config.auto_connect;

        connect_with_retry(&inner.config, cancel, move |attempt| {
            logger.log(
                LogPriority::Verbose,
                &format!("Connection attempt {}", attempt),
            );
            gatt.connect(auto_connect)
        })
        .await?;

        {
            let _guard = inner.lifecycle.lock();
            if cancel.is_cancelled() {
                return Err(Error::OperationCancelled);
            }
            inner.phase.set(ConnectionPhase::Initializing);
        }

        inner.log(LogPriority::Info, "Connected, discovering services...");
        let services = cancellable(cancel, gatt.discover_services()).await?;

        let handles = match CharacteristicHandles::resolve(&services) {
            Ok(handles) => handles,
            Err(e) => {
                inner.supported.store(false, Ordering::SeqCst);
                inner.log(LogPriority::Warn, &e.to_string());
                return Err(e);
            }
        };
        inner.supported.store(true, Ordering::SeqCst);
        inner.log(LogPriority::Info, "LED Button Service found");
        *inner.handles.write() = Some(handles.clone());

        self.spawn_listener(cancel.clone()).await?;

        {
            let _op = inner.ops.lock().await;

            inner.log(LogPriority::Verbose, "Enabling Button notifications...");
            cancellable(cancel, gatt.subscribe(&handles.button)).await?;

            if handles.button_readable() {
                let data = cancellable(cancel, gatt.read(&handles.button)).await?;
                match ButtonState::parse(&data) {
                    Ok(state) => {
                        inner.log(LogPriority::Application, &format!("Button {}", state));
                        inner.button.set(state.is_pressed());
                    }
                    Err(e) => inner.log(LogPriority::Warn, &e.to_string()),
                }
            }

            if handles.led_readable() {
                let data = cancellable(cancel, gatt.read(&handles.led)).await?;
                match LedState::parse(&data) {
                    Ok(state) => {
                        inner.log(LogPriority::Application, &format!("LED {}", state));
                        inner.led.set(state.is_on());
                        inner.led_known.store(true, Ordering::SeqCst);
                    }
                    Err(e) => inner.log(LogPriority::Warn, &e.to_string()),
                }
            }
        }

        {
            let _guard = inner.lifecycle.lock();
            if cancel.is_cancelled() {
                return Err(Error::OperationCancelled);
            }
            inner.phase.set(ConnectionPhase::Ready);
        }

        inner.log(LogPriority::Info, "Ready");
        Ok(())
    }

    async fn spawn_listener(&self, cancel: CancellationToken) -> Result<()> {
        let mut events = self.inner.gatt.events().await?;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.next() => match event {
                        Some(GattEvent::Notification { uuid, value }) => {
                            inner.on_notification(uuid, &value);
                        }
                        Some(GattEvent::Disconnected) | None => {
                            inner.on_link_loss(&cancel).await;
                            break;
                        }
                    },
                }
            }
            trace!("Event listener stopped");
        });

        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Undo a failed `connect()`.
    ///
    /// Runs while the caller still holds the attempt lock, so no newer
    /// connection can exist yet.
    async fn unwind(&self, cancel: &CancellationToken, error: &Error) {
        let inner = &self.inner;

        let reason = match error {
            Error::ConnectionFailed { reason, .. } => *reason,
            Error::UnsupportedDevice { .. } => DisconnectReason::Unsupported,
            _ => DisconnectReason::LinkLoss,
        };

        inner.stop_listener();
        *inner.handles.write() = None;

        if let Err(e) = inner.gatt.disconnect().await {
            debug!("Disconnect after failed connect: {}", e);
        }
        inner.clear_cache_if_unsupported().await;

        let _guard = inner.lifecycle.lock();
        if cancel.is_cancelled() {
            // release() or link loss already published the outcome.
            return;
        }
        cancel.cancel();
        inner.phase.set(ConnectionPhase::Disconnected(reason));
        inner.log(LogPriority::Warn, &format!("Connection failed: {}", error));
    }

    /// Disconnect, or cancel a connection attempt in progress.
    ///
    /// Idempotent: releasing a session that is not connected does nothing.
    /// From `Ready` this waits for the disconnect to complete; during a
    /// connection attempt it waits until the attempt has unwound.
    pub async fn release(&self) -> Result<()> {
        let inner = &self.inner;

        let cancelled_attempt = {
            let _guard = inner.lifecycle.lock();
            match inner.phase.get() {
                ConnectionPhase::Idle
                | ConnectionPhase::Disconnecting
                | ConnectionPhase::Disconnected(_) => return Ok(()),
                ConnectionPhase::Connecting | ConnectionPhase::Initializing => {
                    inner.current_token().cancel();
                    *inner.handles.write() = None;
                    inner
                        .phase
                        .set(ConnectionPhase::Disconnected(DisconnectReason::UserCancelled));
                    inner.log(LogPriority::Info, "Connection cancelled");
                    true
                }
                ConnectionPhase::Ready => {
                    inner.current_token().cancel();
                    *inner.handles.write() = None;
                    inner.phase.set(ConnectionPhase::Disconnecting);
                    false
                }
            }
        };

        if cancelled_attempt {
            drop(inner.attempt.lock().await);
            trace!("Cancelled connection attempt unwound");
            return Ok(());
        }

        inner.log(LogPriority::Info, "Disconnecting...");
        inner.stop_listener();

        if let Err(e) = inner.gatt.disconnect().await {
            inner.log(LogPriority::Warn, &format!("Disconnect failed: {}", e));
        }
        inner.clear_cache_if_unsupported().await;

        inner
            .phase
            .set(ConnectionPhase::Disconnected(DisconnectReason::Success));
        inner.log(LogPriority::Info, "Disconnected");
        Ok(())
    }

    /// Turn the LED on or off.
    ///
    /// Does nothing when the session is not ready or the LED is known to be
    /// in the requested state already.
    ///
    /// # Errors
    ///
    /// Returns the GATT error if the write (or read-back) fails; the
    /// session is then torn down with [`DisconnectReason::LinkLoss`].
    pub async fn turn_led(&self, on: bool) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;

        let Some(handles) = inner.ready_handles() else {
            debug!("Session not ready, ignoring LED request");
            return Ok(());
        };
        if inner.led_known.load(Ordering::SeqCst) && inner.led.get() == on {
            trace!("LED already {}", LedState(on));
            return Ok(());
        }

        let cancel = inner.current_token();
        let write_type = handles.led_write_type(inner.config.prefer_write_without_response);
        let read_back =
            inner.config.led_confirmation == LedConfirmation::ReadBack && handles.led_readable();

        inner.log(
            LogPriority::Verbose,
            &format!("Turning LED {}...", LedState(on)),
        );

        let result = async {
            cancellable(&cancel, inner.gatt.write(&handles.led, &encode_led(on), write_type))
                .await?;
            if read_back {
                cancellable(&cancel, inner.gatt.read(&handles.led))
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        }
        .await;

        match result {
            Ok(None) => {
                inner.log(LogPriority::Application, &format!("LED {}", LedState(on)));
                inner.led.set(on);
                inner.led_known.store(true, Ordering::SeqCst);
            }
            Ok(Some(data)) => match LedState::parse(&data) {
                Ok(state) => {
                    inner.log(LogPriority::Application, &format!("LED {}", state));
                    inner.led.set(state.is_on());
                    inner.led_known.store(true, Ordering::SeqCst);
                }
                Err(e) => inner.log(LogPriority::Warn, &e.to_string()),
            },
            Err(e) if e.is_cancellation() => {
                debug!("LED request cancelled");
            }
            Err(e) => {
                inner.fail_link(&cancel, &e).await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Get the current connection phase.
    pub fn state(&self) -> ConnectionPhase {
        self.inner.phase.get()
    }

    /// Get the simplified state.
    pub fn simplified_state(&self) -> BlinkyState {
        self.inner.phase.get().simplified()
    }

    /// Watch the connection phase.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionPhase> {
        self.inner.phase.subscribe()
    }

    /// Stream the connection phase, starting with the current one.
    pub fn state_stream(&self) -> WatchStream<ConnectionPhase> {
        self.inner.phase.stream()
    }

    /// Last known LED state.
    pub fn led_state(&self) -> bool {
        self.inner.led.get()
    }

    /// Watch the LED state.
    pub fn subscribe_led(&self) -> watch::Receiver<bool> {
        self.inner.led.subscribe()
    }

    /// Last known Button state.
    pub fn button_state(&self) -> bool {
        self.inner.button.get()
    }

    /// Watch the Button state.
    pub fn subscribe_button(&self) -> watch::Receiver<bool> {
        self.inner.button.subscribe()
    }

    /// Whether the service cache is cleared when this session disconnects.
    ///
    /// True until the device passed validation, so a device that turned
    /// out unsupported is rediscovered from scratch next time.
    pub fn clears_cache_on_disconnect(&self) -> bool {
        !self.inner.supported.load(Ordering::SeqCst)
    }

    /// Log a protocol event for this device.
    pub fn log(&self, priority: LogPriority, message: &str) {
        self.inner.log(priority, message);
    }
}

impl<G: GattClient> Drop for BlinkySession<G> {
    fn drop(&mut self) {
        self.inner.current_token().cancel();
        self.inner.stop_listener();
    }
}

impl<G: GattClient> std::fmt::Debug for BlinkySession<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkySession")
            .field("address", &self.address())
            .field("phase", &self.state())
            .finish()
    }
}
