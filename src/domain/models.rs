use crate::domain::error::DiscoveryError;
use tokio::time::Instant;

/// One decoded Heart Rate Measurement notification
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateSample {
    pub beats_per_minute: u16,
    /// Whether the device reports contact status at all
    pub sensor_contact_supported: bool,
    /// Meaningful only if `sensor_contact_supported`
    pub sensor_contact_detected: bool,
    /// Cumulative energy in kilojoules
    pub energy_expended: Option<u16>,
    /// Inter-beat intervals in 1/1024 s units
    pub rr_intervals: Vec<u16>,
    pub timestamp: Instant,
}

/// A BLE peripheral seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl DeviceDescriptor {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown device",
        }
    }
}

/// Best-effort GATT reads performed after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Battery level in percent (0-100)
    pub battery_level: Option<u8>,
}

impl DeviceInfo {
    pub fn battery_fraction(&self) -> Option<f32> {
        self.battery_level.map(|level| f32::from(level.min(100)) / 100.0)
    }
}

/// Coarse session state reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Scanning,
    Connecting,
    Subscribing,
    Streaming,
    Reconnecting,
    Failed,
}

/// A sample that made it through the pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartRateReading {
    /// Value reported by the device
    pub raw_bpm: u16,
    /// Value sent to the integer OSC parameters
    pub forwarded_bpm: i32,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionStatus),
    HeartRate(HeartRateReading),
    DeviceReady {
        device: DeviceDescriptor,
        info: DeviceInfo,
    },
    DiscoveryFailed(DiscoveryError),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
