//! BLE Connection Module
//!
//! Physical link, GATT discovery and the notification forwarder.

use crate::domain::error::ConnectionError;
use crate::domain::models::DeviceInfo;
use crate::infrastructure::bluetooth::protocol;
use crate::session::{LinkEvent, LINK_CHANNEL_CAPACITY};
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timeout for a single GATT read during device info collection
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for establishing the link
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// An established link to one heart rate peripheral
pub struct BleConnection {
    peripheral: Peripheral,
    measurement: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

impl BleConnection {
    /// Connect and discover services
    pub async fn open(
        peripheral: Peripheral,
        config: &ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        info!("Connecting to {}", peripheral.address());

        match time::timeout(config.connect_timeout, peripheral.connect()).await {
            Err(_) => {
                let _ = peripheral.disconnect().await;
                return Err(ConnectionError::Timeout(config.connect_timeout.as_secs()));
            }
            Ok(Err(e)) => return Err(ConnectionError::Connect(e.to_string())),
            Ok(Ok(())) => {}
        }

        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(ConnectionError::Connect(format!(
                "service discovery failed: {}",
                e
            )));
        }

        debug!(
            "Discovered {} characteristic(s) on {}",
            peripheral.characteristics().len(),
            peripheral.address()
        );

        Ok(Self {
            peripheral,
            measurement: None,
            forwarder: None,
        })
    }

    /// Enable measurement notifications and start the forwarder task
    ///
    /// The returned channel carries notifications and a single
    /// [`LinkEvent::Disconnected`] when the adapter reports the link down.
    pub async fn subscribe(
        &mut self,
        adapter: &Adapter,
    ) -> Result<mpsc::Receiver<LinkEvent>, ConnectionError> {
        let characteristic = self
            .find_characteristic(protocol::HEART_RATE_MEASUREMENT_UUID)
            .ok_or(ConnectionError::CharacteristicNotFound)?;

        let mut events = adapter
            .events()
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;
        self.measurement = Some(characteristic);

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let id = self.peripheral.id();

        if let Some(previous) = self.forwarder.take() {
            previous.abort();
        }
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == protocol::HEART_RATE_MEASUREMENT_UUID => {
                            if tx.send(LinkEvent::Notification(n.value)).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("Notification stream ended");
                            break;
                        }
                    },
                    Some(event) = events.next() => {
                        if matches!(&event, CentralEvent::DeviceDisconnected(d) if *d == id) {
                            let _ = tx.send(LinkEvent::Disconnected).await;
                            break;
                        }
                    }
                }
            }
        }));

        info!("Subscribed to heart rate notifications");
        Ok(rx)
    }

    /// Best-effort reads of name, manufacturer, model and battery level
    pub async fn device_info(&self) -> DeviceInfo {
        let name = self.read_string(protocol::DEVICE_NAME_UUID).await;
        let manufacturer = self.read_string(protocol::MANUFACTURER_NAME_UUID).await;
        let model = self.read_string(protocol::MODEL_NUMBER_UUID).await;
        let battery_level = self
            .read(protocol::BATTERY_LEVEL_UUID)
            .await
            .and_then(|bytes| protocol::parse_battery_level(&bytes));

        DeviceInfo {
            name,
            manufacturer,
            model,
            battery_level,
        }
    }

    /// Stop forwarding and release the link
    pub async fn close(mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(characteristic) = self.measurement.take() {
            if let Err(e) = self.peripheral.unsubscribe(&characteristic).await {
                debug!("Unsubscribe failed: {}", e);
            }
        }
        match self.peripheral.disconnect().await {
            Ok(()) => info!("Disconnected from {}", self.peripheral.address()),
            Err(e) => warn!("Disconnect from {} failed: {}", self.peripheral.address(), e),
        }
    }

    fn find_characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    async fn read(&self, uuid: Uuid) -> Option<Vec<u8>> {
        let characteristic = self.find_characteristic(uuid)?;
        match time::timeout(READ_TIMEOUT, self.peripheral.read(&characteristic)).await {
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(e)) => {
                debug!("Read of {} failed: {}", uuid, e);
                None
            }
            Err(_) => {
                debug!("Read of {} timed out", uuid);
                None
            }
        }
    }

    async fn read_string(&self, uuid: Uuid) -> Option<String> {
        self.read(uuid)
            .await
            .and_then(|bytes| protocol::parse_string_characteristic(&bytes))
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
