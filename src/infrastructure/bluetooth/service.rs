//! Bluetooth Service Module
//!
//! Coordinates adapter access, scanning and the single active connection.

use crate::domain::error::{BridgeError, ConnectionError};
use crate::domain::models::{DeviceDescriptor, DeviceInfo};
use crate::infrastructure::bluetooth::{
    connection::{BleConnection, ConnectionConfig},
    scanner::BleScanner,
};
use crate::session::{HeartRateSource, LinkEvent};
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// btleplug-backed heart rate source
pub struct BluetoothService {
    adapter: Option<Adapter>,
    scanner: BleScanner,
    config: ConnectionConfig,
    connection: Option<BleConnection>,
}

impl BluetoothService {
    /// `preset_address` is always reported by scans, whatever its name
    pub fn new(config: ConnectionConfig, preset_address: Option<String>) -> Self {
        Self {
            adapter: None,
            scanner: BleScanner::new(preset_address),
            config,
            connection: None,
        }
    }

    /// First adapter of the platform manager, initialized on first use
    async fn adapter(&mut self) -> Result<Adapter, ConnectionError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| ConnectionError::AdapterUnavailable("no adapter found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find_peripheral(
        adapter: &Adapter,
        address: &str,
    ) -> Result<Peripheral, ConnectionError> {
        adapter
            .peripherals()
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| ConnectionError::DeviceNotFound {
                address: address.to_string(),
            })
    }
}

#[async_trait]
impl HeartRateSource for BluetoothService {
    async fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        let adapter = self.adapter().await?;
        Ok(self.scanner.scan(&adapter, timeout).await?)
    }

    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<(), BridgeError> {
        if let Some(previous) = self.connection.take() {
            previous.close().await;
        }

        let adapter = self.adapter().await?;
        let peripheral = Self::find_peripheral(&adapter, &device.address).await?;
        self.connection = Some(BleConnection::open(peripheral, &self.config).await?);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>, BridgeError> {
        let adapter = self.adapter().await?;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| ConnectionError::Subscribe("not connected".to_string()))?;
        Ok(connection.subscribe(&adapter).await?)
    }

    async fn device_info(&mut self) -> DeviceInfo {
        match &self.connection {
            Some(connection) => connection.device_info().await,
            None => DeviceInfo::default(),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}
