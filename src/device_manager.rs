//! Device manager for discovering and connecting to Blinky peripherals.
//!
//! Owns the Bluetooth adapter, the scanner, and one [`BlinkyManager`] per
//! connected device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use btleplug::api::{Central, Manager as _};
use btleplug::platform::{Adapter, Manager};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::ble::gatt::{BtleplugGatt, GattClient};
use crate::ble::scanner::{AdapterScanBackend, BleScanner, ScannerEvent, ScanningState};
use crate::blinky::{Blinky, BlinkyManager};
use crate::config::BlinkyConfig;
use crate::data::{DiscoveredDevice, ScanFilter};
use crate::error::{Error, Result};
use crate::logging::{LogSink, ProtocolLogger};
use crate::permissions::{GrantedPermissions, PermissionProvider};
use crate::session::BlinkySession;

/// Handle for a registered callback.
///
/// The callback is unregistered when the handle is dropped.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Sessions by device address.
///
/// At most one [`BlinkyManager`] exists per address; concurrent connects to
/// the same address share it.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: RwLock<HashMap<String, BlinkyManager>>,
}

impl SessionRegistry {
    pub(crate) fn get(&self, address: &str) -> Option<BlinkyManager> {
        self.sessions.read().get(address).cloned()
    }

    /// Register `candidate` unless the address already has a session, and
    /// return whichever is registered.
    pub(crate) fn insert_or_get(&self, address: &str, candidate: BlinkyManager) -> BlinkyManager {
        self.sessions
            .write()
            .entry(address.to_string())
            .or_insert(candidate)
            .clone()
    }

    pub(crate) fn remove(&self, address: &str) -> Option<BlinkyManager> {
        self.sessions.write().remove(address)
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Connect a registered session, waiting out a connect or disconnect
    /// already running on it. The session is forgotten if connecting fails.
    pub(crate) async fn connect(
        &self,
        address: &str,
        manager: BlinkyManager,
    ) -> Result<BlinkyManager> {
        let result = loop {
            let mut phase = manager.state();
            let settled = phase.wait_for(|p| !p.is_transitioning()).await.is_ok();
            if !settled {
                break Err(Error::NotConnected);
            }
            match manager.connect().await {
                Err(Error::SessionBusy) => {
                    // A cancelled attempt is still unwinding.
                    trace!("Session of {} busy, waiting", address);
                    tokio::task::yield_now().await;
                }
                other => break other,
            }
        };

        if let Err(e) = result {
            let mut sessions = self.sessions.write();
            if sessions
                .get(address)
                .is_some_and(|current| current.is_same_device(&manager))
            {
                sessions.remove(address);
            }
            return Err(e);
        }

        Ok(manager)
    }

    /// Release and forget every session.
    ///
    /// All sessions are released even if one fails; the first error is
    /// returned.
    pub(crate) async fn release_all(&self) -> Result<()> {
        let sessions: Vec<_> = self.sessions.write().drain().collect();
        let mut first_error = None;
        for (address, manager) in sessions {
            if let Err(e) = manager.release().await {
                warn!("Error releasing {}: {}", address, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Central entry point: scan for Blinky devices and connect to them.
pub struct DeviceManager {
    adapter: Adapter,
    config: BlinkyConfig,
    scanner: BleScanner<AdapterScanBackend>,
    sessions: SessionRegistry,
    log_sink: RwLock<Option<Arc<dyn LogSink>>>,
    callback_counter: AtomicU64,
}

impl DeviceManager {
    /// Create a manager on the first Bluetooth adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Self::with_config(BlinkyConfig::default()).await
    }

    /// Create a manager on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Bluetooth is
    /// not available.
    pub async fn with_config(config: BlinkyConfig) -> Result<Self> {
        config.validate()?;

        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, config, Arc::new(GrantedPermissions))
    }

    /// Create a manager on a specific adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_adapter(
        adapter: Adapter,
        config: BlinkyConfig,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let scanner = BleScanner::new(
            AdapterScanBackend::new(adapter.clone()),
            permissions,
            config.scanner.clone(),
        );

        Ok(Self {
            adapter,
            config,
            scanner,
            sessions: SessionRegistry::default(),
            log_sink: RwLock::new(None),
            callback_counter: AtomicU64::new(0),
        })
    }

    /// Forward protocol logs of sessions created from now on to `sink`.
    pub fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        *self.log_sink.write() = Some(sink);
    }

    /// Get the configuration.
    pub fn config(&self) -> &BlinkyConfig {
        &self.config
    }

    /// Start scanning for devices advertising the configured service.
    pub async fn start_scanning(&self) -> Result<()> {
        self.scanner
            .start_scan(self.config.scanner.service_uuid)
            .await
    }

    /// Stop scanning. Discovered devices are kept.
    pub async fn stop_scanning(&self) -> Result<()> {
        self.scanner.stop_scan().await
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Devices that match the active filter.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.scanner.devices()
    }

    /// Look up a discovered device by address.
    pub fn device(&self, address: &str) -> Option<DiscoveredDevice> {
        self.scanner.device(address)
    }

    /// Replace the scan filter and return the newly filtered list.
    pub fn set_filter(&self, filter: ScanFilter) -> Vec<DiscoveredDevice> {
        self.scanner.apply_filter(filter)
    }

    /// Get the active scan filter.
    pub fn filter(&self) -> ScanFilter {
        self.scanner.filter()
    }

    /// Forget every discovered device.
    pub fn clear(&self) {
        self.scanner.clear();
    }

    /// Get the scanner state.
    pub fn scanning_state(&self) -> ScanningState {
        self.scanner.state()
    }

    /// Watch the scanner state.
    pub fn subscribe_scanning_state(&self) -> watch::Receiver<ScanningState> {
        self.scanner.subscribe_state()
    }

    /// Subscribe to scanner events.
    pub fn subscribe_device_found(&self) -> broadcast::Receiver<ScannerEvent> {
        self.scanner.subscribe()
    }

    /// Register a callback for devices that start matching the filter.
    pub fn on_device_found<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DiscoveredDevice) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.scanner.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ScannerEvent::DeviceFound(device)) => callback(device),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Device callback lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Connect to the device with the given address.
    ///
    /// Returns the existing handle if the device already has a session.
    /// Concurrent calls for the same address share one session.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if the adapter does not know the address,
    /// otherwise whatever [`BlinkySession::connect`] reports.
    pub async fn connect(&self, address: &str) -> Result<BlinkyManager> {
        let manager = match self.sessions.get(address) {
            Some(manager) => {
                debug!("Reusing session for {}", address);
                manager
            }
            None => {
                let gatt = self.find_peripheral(address).await?;

                let mut logger = ProtocolLogger::new(address);
                if let Some(sink) = self.log_sink.read().clone() {
                    logger = logger.with_sink(sink);
                }

                let candidate = BlinkyManager::new(BlinkySession::with_logger(
                    gatt,
                    self.config.connection.clone(),
                    logger,
                ));
                self.sessions.insert_or_get(address, candidate)
            }
        };

        let manager = self.sessions.connect(address, manager).await?;
        info!("Connected to {}", address);
        Ok(manager)
    }

    /// Get the session of a device, if one exists.
    pub fn session(&self, address: &str) -> Option<BlinkyManager> {
        self.sessions.get(address)
    }

    /// Release the session of a device and forget it.
    pub async fn disconnect(&self, address: &str) -> Result<()> {
        match self.sessions.remove(address) {
            Some(manager) => manager.release().await,
            None => Ok(()),
        }
    }

    /// Stop scanning and release every session.
    ///
    /// Sessions are released even if stopping the scan fails; the first
    /// error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down device manager");

        let scan = self.stop_scanning().await;
        if let Err(e) = &scan {
            warn!("Failed to stop scanning: {}", e);
        }

        debug!("Releasing {} session(s)", self.sessions.len());
        let released = self.sessions.release_all().await;

        scan.and(released)
    }

    async fn find_peripheral(&self, address: &str) -> Result<BtleplugGatt> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .map(|p| BtleplugGatt::new(self.adapter.clone(), p))
            .find(|gatt| gatt.address().eq_ignore_ascii_case(address))
            .ok_or_else(|| Error::DeviceNotFound {
                address: address.to_string(),
            })
    }
}
