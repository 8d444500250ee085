//! BLE Scanner Module
//!
//! Timed discovery of heart rate candidates.

use crate::domain::error::ConnectionError;
use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::protocol;
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name fragments typical for heart rate straps, bands and watches
pub const HEART_RATE_KEYWORDS: &[&str] = &[
    "heart", "hr", "pulse", "chest", "strap", "polar", "garmin", "wahoo", "fitbit", "suunto",
    "coros", "xiaomi", "huawei", "samsung", "band", "watch", "tracker", "monitor", "sensor",
    "fitness", "sport",
];

/// Whether a scanned peripheral may be a heart rate sensor
///
/// True when it advertises the Heart Rate Service, its name contains one of
/// [`HEART_RATE_KEYWORDS`], or it has no name at all.
pub fn is_heart_rate_candidate(name: Option<&str>, services: &[Uuid]) -> bool {
    if services.contains(&protocol::HEART_RATE_SERVICE_UUID) {
        return true;
    }
    match name.map(str::trim) {
        None | Some("") => true,
        Some(name) => {
            let name = name.to_lowercase();
            HEART_RATE_KEYWORDS.iter().any(|k| name.contains(k))
        }
    }
}

/// BLE Scanner for heart rate devices
pub struct BleScanner {
    /// Address kept regardless of the candidate heuristics
    always_include: Option<String>,
}

impl BleScanner {
    pub fn new(always_include: Option<String>) -> Self {
        Self { always_include }
    }

    /// Scan for `timeout` and return the candidates seen
    ///
    /// No service filter is applied; many bands only expose the Heart Rate
    /// Service after connecting.
    pub async fn scan(
        &self,
        adapter: &Adapter,
        timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, ConnectionError> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectionError::Scan(e.to_string()))?;

        tokio::time::sleep(timeout).await;

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| ConnectionError::Scan(e.to_string()))?;

        let mut devices = Vec::new();
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping peripheral without properties: {}", e);
                    continue;
                }
            };

            let address = peripheral.address().to_string();
            let name = properties.local_name.clone();
            debug!(
                "Found {} ({}), rssi {:?}",
                name.as_deref().unwrap_or("Unknown device"),
                address,
                properties.rssi
            );

            let forced = self
                .always_include
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(&address));
            if forced || is_heart_rate_candidate(name.as_deref(), &properties.services) {
                devices.push(DeviceDescriptor {
                    address,
                    name,
                    rssi: properties.rssi,
                });
            }
        }

        info!("BLE scan found {} candidate device(s)", devices.len());
        Ok(devices)
    }
}
