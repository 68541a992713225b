//! GATT client abstraction.
//!
//! [`GattClient`] is the narrow set of GATT operations a connection session
//! needs. [`BtleplugGatt`] implements it on top of a `btleplug` peripheral;
//! tests drive the session through a scripted client instead.

use std::pin::Pin;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Peripheral as _, Service, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{Stream, StreamExt};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Event delivered by a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// A characteristic sent a notification.
    Notification {
        /// UUID of the notifying characteristic.
        uuid: Uuid,
        /// Notified value.
        value: Vec<u8>,
    },
    /// The link to the peripheral dropped.
    Disconnected,
}

/// Stream of [`GattEvent`]s for one peripheral.
pub type GattEventStream = Pin<Box<dyn Stream<Item = GattEvent> + Send>>;

/// GATT operations on a single peripheral.
///
/// Every method performs one platform request; retries and timeouts are
/// the caller's business.
#[async_trait]
pub trait GattClient: Send + Sync + 'static {
    /// Address of the peripheral, used for logging.
    fn address(&self) -> String;

    /// Make one connection attempt.
    async fn connect(&self, auto_connect: bool) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// Discover services and return them with their characteristics.
    async fn discover_services(&self) -> Result<Vec<Service>>;

    /// Read a characteristic.
    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    /// Write a characteristic.
    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()>;

    /// Open a stream of notifications and disconnect events.
    ///
    /// Only events that happen after this call are delivered.
    async fn events(&self) -> Result<GattEventStream>;

    /// Drop any cached service table so the next connection rediscovers it.
    ///
    /// Best effort: backends without a cache API may only log the request,
    /// so callers must not rely on the table actually being refreshed.
    async fn clear_cache(&self) -> Result<()>;
}

/// [`GattClient`] over a `btleplug` peripheral.
///
/// Disconnects are not reported on the peripheral itself, so the adapter's
/// central event stream is watched for this peripheral's id.
#[derive(Debug, Clone)]
pub struct BtleplugGatt {
    adapter: Adapter,
    peripheral: Peripheral,
    address: String,
}

impl BtleplugGatt {
    /// Wrap a peripheral found on `adapter`.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        let address = match peripheral.address() {
            addr if addr == BDAddr::default() => peripheral.id().to_string(),
            addr => addr.to_string(),
        };

        Self {
            adapter,
            peripheral,
            address,
        }
    }

    /// Get the wrapped peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl GattClient for BtleplugGatt {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self, auto_connect: bool) -> Result<()> {
        if auto_connect {
            debug!("Auto-connect is not available on this platform, connecting directly");
        }
        if self.peripheral.is_connected().await? {
            return Ok(());
        }
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        self.peripheral.discover_services().await?;
        let services: Vec<Service> = self.peripheral.services().into_iter().collect();
        debug!("Discovered {} services on {}", services.len(), self.address);
        Ok(services)
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let data = self.peripheral.read(characteristic).await?;
        trace!(
            "Read {} bytes from characteristic {}",
            data.len(),
            characteristic.uuid
        );
        Ok(data)
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.peripheral
            .write(characteristic, data, write_type)
            .await?;
        trace!(
            "Wrote {} bytes to characteristic {} ({:?})",
            data.len(),
            characteristic.uuid,
            write_type
        );
        Ok(())
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.peripheral.subscribe(characteristic).await.map_err(|e| {
            debug!("Failed to subscribe to {}: {:?}", characteristic.uuid, e);
            Error::Bluetooth(e)
        })
    }

    async fn events(&self) -> Result<GattEventStream> {
        let notifications = self
            .peripheral
            .notifications()
            .await?
            .map(|n| GattEvent::Notification {
                uuid: n.uuid,
                value: n.value,
            });

        let id = self.peripheral.id();
        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let event = match event {
                CentralEvent::DeviceDisconnected(ref other) if *other == id => {
                    Some(GattEvent::Disconnected)
                }
                _ => None,
            };
            futures::future::ready(event)
        });

        Ok(Box::pin(futures::stream::select(notifications, disconnects)))
    }

    /// btleplug exposes no cache control; this only logs.
    async fn clear_cache(&self) -> Result<()> {
        // btleplug re-reads the service table on every discover_services().
        debug!("Service cache of {} invalidated", self.address);
        Ok(())
    }
}

/// Scripted in-memory peripheral for session tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use btleplug::api::CharPropFlags;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    use crate::ble::uuids::{
        BLINKY_BUTTON_CHARACTERISTIC_UUID, BLINKY_LED_CHARACTERISTIC_UUID, BLINKY_SERVICE_UUID,
    };

    /// Outcome of one scripted connection attempt.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum ConnectOutcome {
        Succeed,
        Fail,
        Hang,
    }

    pub(crate) fn characteristic(uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: BLINKY_SERVICE_UUID,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    pub(crate) fn service(uuid: Uuid, characteristics: Vec<Characteristic>) -> Service {
        Service {
            uuid,
            primary: true,
            characteristics: characteristics.into_iter().collect(),
        }
    }

    /// Services of a well-behaved Blinky peripheral.
    pub(crate) fn blinky_services() -> Vec<Service> {
        vec![service(
            BLINKY_SERVICE_UUID,
            vec![
                characteristic(
                    BLINKY_LED_CHARACTERISTIC_UUID,
                    CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                ),
                characteristic(
                    BLINKY_BUTTON_CHARACTERISTIC_UUID,
                    CharPropFlags::READ | CharPropFlags::NOTIFY,
                ),
            ],
        )]
    }

    pub(crate) struct FakeGatt {
        address: String,
        services: Mutex<Vec<Service>>,
        script: Mutex<VecDeque<ConnectOutcome>>,
        values: Mutex<HashMap<Uuid, Vec<u8>>>,
        write_delay: Mutex<Duration>,
        discovery_delay: Mutex<Duration>,
        fail_writes: AtomicBool,
        apply_writes: AtomicBool,
        events_tx: broadcast::Sender<GattEvent>,
        pub writes: Mutex<Vec<(Uuid, Vec<u8>, WriteType)>>,
        pub subscriptions: Mutex<Vec<Uuid>>,
        pub connects: AtomicU32,
        pub disconnects: AtomicU32,
        pub cache_clears: AtomicU32,
    }

    impl FakeGatt {
        pub(crate) fn new() -> Self {
            let (events_tx, _) = broadcast::channel(16);
            let mut values = HashMap::new();
            values.insert(BLINKY_LED_CHARACTERISTIC_UUID, vec![0x00]);
            values.insert(BLINKY_BUTTON_CHARACTERISTIC_UUID, vec![0x00]);

            Self {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
                services: Mutex::new(blinky_services()),
                script: Mutex::new(VecDeque::new()),
                values: Mutex::new(values),
                write_delay: Mutex::new(Duration::ZERO),
                discovery_delay: Mutex::new(Duration::ZERO),
                fail_writes: AtomicBool::new(false),
                apply_writes: AtomicBool::new(true),
                events_tx,
                writes: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                cache_clears: AtomicU32::new(0),
            }
        }

        /// Queue connection outcomes; once exhausted every attempt succeeds.
        pub(crate) fn with_script(self, outcomes: Vec<ConnectOutcome>) -> Self {
            *self.script.lock() = outcomes.into();
            self
        }

        pub(crate) fn with_services(self, services: Vec<Service>) -> Self {
            *self.services.lock() = services;
            self
        }

        pub(crate) fn with_value(self, uuid: Uuid, value: Vec<u8>) -> Self {
            self.values.lock().insert(uuid, value);
            self
        }

        pub(crate) fn set_write_delay(&self, delay: Duration) {
            *self.write_delay.lock() = delay;
        }

        pub(crate) fn set_discovery_delay(&self, delay: Duration) {
            *self.discovery_delay.lock() = delay;
        }

        pub(crate) fn fail_writes(&self) {
            self.fail_writes.store(true, Ordering::SeqCst);
        }

        /// Accept writes without changing the stored value.
        pub(crate) fn ignore_writes(&self) {
            self.apply_writes.store(false, Ordering::SeqCst);
        }

        pub(crate) fn notify(&self, uuid: Uuid, value: Vec<u8>) {
            let _ = self.events_tx.send(GattEvent::Notification { uuid, value });
        }

        pub(crate) fn drop_link(&self) {
            let _ = self.events_tx.send(GattEvent::Disconnected);
        }

        pub(crate) fn led_writes(&self) -> Vec<Vec<u8>> {
            self.writes
                .lock()
                .iter()
                .filter(|(uuid, _, _)| *uuid == BLINKY_LED_CHARACTERISTIC_UUID)
                .map(|(_, data, _)| data.clone())
                .collect()
        }
    }

    #[async_trait]
    impl GattClient for FakeGatt {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn connect(&self, _auto_connect: bool) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(ConnectOutcome::Succeed);
            match outcome {
                ConnectOutcome::Succeed => Ok(()),
                ConnectOutcome::Fail => Err(Error::Internal("connection refused".to_string())),
                ConnectOutcome::Hang => futures::future::pending().await,
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn discover_services(&self) -> Result<Vec<Service>> {
            let delay = *self.discovery_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self.services.lock().clone())
        }

        async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
            self.values
                .lock()
                .get(&characteristic.uuid)
                .cloned()
                .ok_or_else(|| Error::CharacteristicNotFound {
                    uuid: characteristic.uuid.to_string(),
                })
        }

        async fn write(
            &self,
            characteristic: &Characteristic,
            data: &[u8],
            write_type: WriteType,
        ) -> Result<()> {
            let delay = *self.write_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            self.writes
                .lock()
                .push((characteristic.uuid, data.to_vec(), write_type));
            if self.apply_writes.load(Ordering::SeqCst) {
                self.values.lock().insert(characteristic.uuid, data.to_vec());
            }
            Ok(())
        }

        async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
            self.subscriptions.lock().push(characteristic.uuid);
            Ok(())
        }

        async fn events(&self) -> Result<GattEventStream> {
            let stream = BroadcastStream::new(self.events_tx.subscribe())
                .filter_map(|event| futures::future::ready(event.ok()));
            Ok(Box::pin(stream))
        }

        async fn clear_cache(&self) -> Result<()> {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use crate::ble::uuids::BLINKY_BUTTON_CHARACTERISTIC_UUID;

    #[tokio::test]
    async fn test_fake_delivers_events_after_subscription() {
        let gatt = FakeGatt::new();
        gatt.notify(BLINKY_BUTTON_CHARACTERISTIC_UUID, vec![0x01]);

        let mut events = gatt.events().await.unwrap();
        gatt.notify(BLINKY_BUTTON_CHARACTERISTIC_UUID, vec![0x00]);
        gatt.drop_link();

        assert_eq!(
            events.next().await,
            Some(GattEvent::Notification {
                uuid: BLINKY_BUTTON_CHARACTERISTIC_UUID,
                value: vec![0x00],
            })
        );
        assert_eq!(events.next().await, Some(GattEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_fake_connect_script() {
        let gatt = FakeGatt::new().with_script(vec![ConnectOutcome::Fail]);
        assert!(gatt.connect(false).await.is_err());
        assert!(gatt.connect(false).await.is_ok());
    }
}
