//! BLE scanning functionality.
//!
//! [`BleScanner`] drives a [`ScanBackend`], feeds every advertisement into a
//! [`DeviceStore`], and publishes the filtered device list.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter as PlatformScanFilter};
use btleplug::platform::Adapter;
use futures::stream::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::config::ScannerConfig;
use crate::data::{DeviceStore, DiscoveredDevice, ScanFilter};
use crate::error::{Error, Result};
use crate::permissions::PermissionProvider;
use crate::state::ObservableState;

/// Stream of received advertisements.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

/// Platform advertisement source.
#[async_trait]
pub trait ScanBackend: Send + Sync + 'static {
    /// Start listening for advertisements.
    async fn start(&self) -> Result<()>;

    /// Stop listening.
    async fn stop(&self) -> Result<()>;

    /// Open a stream of advertisements received from now on.
    async fn advertisements(&self) -> Result<AdvertisementStream>;
}

/// [`ScanBackend`] over a `btleplug` adapter.
///
/// The platform scan is unfiltered; service filtering happens in the
/// [`DeviceStore`] so it can be toggled while scanning.
#[derive(Debug, Clone)]
pub struct AdapterScanBackend {
    adapter: Adapter,
}

impl AdapterScanBackend {
    /// Create a backend on the given adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl ScanBackend for AdapterScanBackend {
    async fn start(&self) -> Result<()> {
        self.adapter
            .start_scan(PlatformScanFilter::default())
            .await
            .map_err(Error::Bluetooth)
    }

    async fn stop(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn advertisements(&self) -> Result<AdvertisementStream> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. }
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => return None,
                };

                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        return None;
                    }
                };

                let properties = peripheral.properties().await.ok()??;
                Advertisement::from_properties(&id.to_string(), &properties)
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Why scanning is not possible.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanError {
    /// A runtime permission is missing.
    PermissionDenied {
        /// The missing permission.
        permission: String,
    },
    /// The platform refused to start the scan.
    StartFailed {
        /// Platform error message.
        reason: String,
    },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied { permission } => {
                write!(f, "permission not granted: {}", permission)
            }
            Self::StartFailed { reason } => write!(f, "scan failed: {}", reason),
        }
    }
}

impl From<ScanError> for Error {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::PermissionDenied { permission } => Error::PermissionDenied { permission },
            ScanError::StartFailed { reason } => Error::ScanStartFailed { reason },
        }
    }
}

/// Published scanner state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanningState {
    /// Not scanning and nothing to show.
    #[default]
    Idle,
    /// Scanning, no device matches the filter yet.
    Scanning,
    /// The filtered device list.
    DevicesDiscovered(Vec<DiscoveredDevice>),
    /// Scanning could not start.
    Failed(ScanError),
}

impl ScanningState {
    /// Get the devices carried by this state.
    pub fn devices(&self) -> &[DiscoveredDevice] {
        match self {
            Self::DevicesDiscovered(devices) => devices,
            _ => &[],
        }
    }
}

/// Event broadcast by the scanner.
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    /// A device started matching the active filter.
    DeviceFound(DiscoveredDevice),
}

/// State shared between the scanner and its scan task.
#[derive(Clone)]
struct ScanContext {
    store: Arc<RwLock<DeviceStore>>,
    state: Arc<ObservableState<ScanningState>>,
    event_tx: broadcast::Sender<ScannerEvent>,
    permissions: Arc<dyn PermissionProvider>,
}

impl ScanContext {
    fn publish(&self, devices: Vec<DiscoveredDevice>, scanning: bool) {
        if !devices.is_empty() {
            self.state.replace(ScanningState::DevicesDiscovered(devices));
        } else if scanning {
            self.state.set(ScanningState::Scanning);
        } else {
            self.state.set(ScanningState::Idle);
        }
    }

    fn handle(&self, advertisements: &[Advertisement]) {
        let mut found = Vec::new();
        let devices = {
            let mut store = self.store.write();
            for adv in advertisements {
                if store.on_advertisement(adv) {
                    if let Some(device) = store.get(&adv.address) {
                        found.push(device.clone());
                    }
                }
            }
            store.refresh()
        };

        for device in found {
            debug!("Found matching device: {}", device);
            let _ = self.event_tx.send(ScannerEvent::DeviceFound(device));
        }

        self.publish(devices, true);
    }

    async fn run(
        self,
        mut stream: AdvertisementStream,
        cancel: CancellationToken,
        report_delay: Duration,
        mut location_unconfirmed: bool,
    ) {
        let mut batch = Vec::new();
        let mut ticker = (!report_delay.is_zero()).then(|| tokio::time::interval(report_delay));

        loop {
            let tick = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                adv = stream.next() => {
                    let Some(adv) = adv else {
                        debug!("Advertisement stream ended");
                        break;
                    };
                    if location_unconfirmed {
                        info!("Scan results arrive with location off; location not required");
                        self.permissions.mark_location_not_required();
                        location_unconfirmed = false;
                    }
                    if report_delay.is_zero() {
                        self.handle(std::slice::from_ref(&adv));
                    } else {
                        batch.push(adv);
                    }
                }
                _ = tick => {
                    if !batch.is_empty() {
                        trace!("Delivering batch of {} advertisements", batch.len());
                        self.handle(&batch);
                        batch.clear();
                    }
                }
            }
        }

        if !batch.is_empty() && !cancel.is_cancelled() {
            self.handle(&batch);
        }

        debug!("Scan event loop ended");
    }
}

struct ActiveScan {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// BLE scanner for discovering Blinky peripherals.
pub struct BleScanner<B: ScanBackend> {
    backend: Arc<B>,
    config: ScannerConfig,
    ctx: ScanContext,
    active: Mutex<Option<ActiveScan>>,
    /// Serializes `start_scan` and `stop_scan` across their awaits.
    transition: tokio::sync::Mutex<()>,
}

impl<B: ScanBackend> BleScanner<B> {
    /// Create a scanner.
    pub fn new(backend: B, permissions: Arc<dyn PermissionProvider>, config: ScannerConfig) -> Self {
        let store = DeviceStore::new(config.service_uuid, config.nearby_rssi).with_filter(config.filter);
        let (event_tx, _) = broadcast::channel(100);

        Self {
            backend: Arc::new(backend),
            config,
            ctx: ScanContext {
                store: Arc::new(RwLock::new(store)),
                state: Arc::new(ObservableState::default()),
                event_tx,
                permissions,
            },
            active: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Start scanning.
    ///
    /// With `filter_uuid` set, the service filter only passes devices that
    /// advertise it; with `None` the service filter always passes. Calling
    /// this while already scanning does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] if the permission provider reports a
    /// missing permission, [`Error::ScanStartFailed`] if the platform
    /// refuses the scan. Both are also published as
    /// [`ScanningState::Failed`].
    pub async fn start_scan(&self, filter_uuid: Option<Uuid>) -> Result<()> {
        let _transition = self.transition.lock().await;
        if self.is_scanning() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        let permissions = &self.ctx.permissions;
        if !permissions.is_permission_granted() {
            return Err(self.fail(ScanError::PermissionDenied {
                permission: permissions.missing_permission(),
            }));
        }

        let location_unconfirmed =
            permissions.is_location_required() && !permissions.is_location_enabled();
        if location_unconfirmed {
            warn!("Location service is off; scan results may not be delivered");
        }

        self.ctx.store.write().set_service_uuid(filter_uuid);

        info!("Starting BLE scan (service filter: {:?})", filter_uuid);

        let stream = match self.backend.advertisements().await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(ScanError::StartFailed { reason: e.to_string() })),
        };
        if let Err(e) = self.backend.start().await {
            return Err(self.fail(ScanError::StartFailed { reason: e.to_string() }));
        }

        let devices = self.ctx.store.write().refresh();
        self.ctx.publish(devices, true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.ctx.clone().run(
            stream,
            cancel.clone(),
            self.config.report_delay,
            location_unconfirmed,
        ));
        *self.active.lock() = Some(ActiveScan { cancel, task });

        Ok(())
    }

    /// Stop scanning. Discovered devices are kept.
    pub async fn stop_scan(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let Some(active) = self.active.lock().take() else {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        };

        info!("Stopping BLE scan");

        active.cancel.cancel();
        let _ = active.task.await;

        let devices = self.devices();
        self.ctx.publish(devices, false);

        self.backend.stop().await
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Replace the filter and return the newly filtered list.
    pub fn apply_filter(&self, filter: ScanFilter) -> Vec<DiscoveredDevice> {
        let devices = self.ctx.store.write().apply_filter(filter);
        self.ctx.publish(devices.clone(), self.is_scanning());
        devices
    }

    /// Get the active filter.
    pub fn filter(&self) -> ScanFilter {
        self.ctx.store.read().filter()
    }

    /// Forget every discovered device.
    pub fn clear(&self) {
        self.ctx.store.write().clear();
        self.ctx.publish(Vec::new(), self.is_scanning());
    }

    /// Devices that match the active filter.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.ctx
            .store
            .read()
            .filtered()
            .map(<[DiscoveredDevice]>::to_vec)
            .unwrap_or_default()
    }

    /// Look up any discovered device by address, filtered or not.
    pub fn device(&self, address: &str) -> Option<DiscoveredDevice> {
        self.ctx.store.read().get(address).cloned()
    }

    /// Get the current scanner state.
    pub fn state(&self) -> ScanningState {
        self.ctx.state.get()
    }

    /// Watch the scanner state.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanningState> {
        self.ctx.state.subscribe()
    }

    /// Subscribe to scanner events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.ctx.event_tx.subscribe()
    }

    /// Get the scan backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn fail(&self, error: ScanError) -> Error {
        warn!("Scan not started: {}", error);
        self.ctx.state.set(ScanningState::Failed(error.clone()));
        error.into()
    }
}

impl<B: ScanBackend> Drop for BleScanner<B> {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}
