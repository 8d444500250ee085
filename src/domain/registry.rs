//! Device History
//!
//! Remembers the last successfully used device for auto-reconnect, plus a
//! short list of recently used devices.

use crate::domain::models::DeviceDescriptor;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Number of devices kept in the history list
pub const MAX_HISTORY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: String,
    pub name: String,
    pub last_connected: DateTime<Local>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceHistory {
    #[serde(default)]
    pub last_device: Option<DeviceRecord>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

/// Persistence seam for the "last used device"
pub trait DeviceRegistry: Send {
    fn last_device(&self) -> Option<DeviceRecord>;

    fn set_last_device(&mut self, device: &DeviceDescriptor) -> anyhow::Result<()>;
}

/// JSON-file backed history; in-memory when created without a path
pub struct DeviceHistoryStore {
    history: DeviceHistory,
    path: Option<PathBuf>,
}

impl DeviceHistoryStore {
    /// Load from `path`; a missing or unreadable file starts an empty history
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = match Self::load_from_file(&path) {
            Ok(history) => history,
            Err(e) => {
                if path.exists() {
                    warn!("Failed to load device history {:?}: {}", path, e);
                }
                DeviceHistory::default()
            }
        };
        Self {
            history,
            path: Some(path),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            history: DeviceHistory::default(),
            path: None,
        }
    }

    fn load_from_file(path: &Path) -> anyhow::Result<DeviceHistory> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&self.history)?;
            fs::write(path, json)?;
        }
        Ok(())
    }

    pub fn history(&self) -> &DeviceHistory {
        &self.history
    }
}

impl DeviceRegistry for DeviceHistoryStore {
    fn last_device(&self) -> Option<DeviceRecord> {
        self.history.last_device.clone()
    }

    fn set_last_device(&mut self, device: &DeviceDescriptor) -> anyhow::Result<()> {
        let record = DeviceRecord {
            address: device.address.clone(),
            name: device.display_name().to_string(),
            last_connected: Local::now(),
        };

        let devices = &mut self.history.devices;
        if let Some(existing) = devices.iter_mut().find(|d| d.address == record.address) {
            *existing = record.clone();
        } else {
            devices.push(record.clone());
            if devices.len() > MAX_HISTORY {
                devices.remove(0);
            }
        }
        self.history.last_device = Some(record);

        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            address: address.to_string(),
            name: Some(name.to_string()),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_persists_last_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_history.json");

        let mut store = DeviceHistoryStore::open(&path);
        assert!(store.last_device().is_none());
        store
            .set_last_device(&device("AA:BB:CC:DD:EE:01", "Polar H10"))
            .unwrap();

        let reopened = DeviceHistoryStore::open(&path);
        let last = reopened.last_device().unwrap();
        assert_eq!(last.address, "AA:BB:CC:DD:EE:01");
        assert_eq!(last.name, "Polar H10");
    }

    #[test]
    fn test_history_deduplicates_and_caps() {
        let mut store = DeviceHistoryStore::in_memory();
        for i in 0..12 {
            store
                .set_last_device(&device(&format!("00:00:00:00:00:{:02}", i), "Band"))
                .unwrap();
        }
        store
            .set_last_device(&device("00:00:00:00:00:11", "Band 2"))
            .unwrap();

        let history = store.history();
        assert_eq!(history.devices.len(), MAX_HISTORY);
        assert_eq!(history.devices[0].address, "00:00:00:00:00:02");
        assert_eq!(
            history
                .devices
                .iter()
                .filter(|d| d.address == "00:00:00:00:00:11")
                .count(),
            1
        );
        assert_eq!(history.last_device.as_ref().unwrap().name, "Band 2");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_history.json");
        fs::write(&path, "{ not json").unwrap();

        let store = DeviceHistoryStore::open(&path);
        assert!(store.last_device().is_none());
    }
}
