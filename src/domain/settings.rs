use crate::domain::smoothing::HeartRateBounds;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const APP_DIR: &str = "BluetoothHeartRateOSC";
const SETTINGS_FILE: &str = "settings.json";
const DEVICE_HISTORY_FILE: &str = "device_history.json";

/// Accepted range for the scan timeout and keepalive interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name: default_log_file(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    ".".to_string()
}
fn default_log_file() -> String {
    "bluetooth_heartrate.log".to_string()
}
fn default_rotation() -> String {
    "never".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // OSC target
    #[serde(default = "default_osc_ip")]
    pub osc_ip: String,
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,

    // Bluetooth discovery
    #[serde(default = "default_scan_timeout")]
    pub bluetooth_scan_timeout: f64,
    #[serde(default)]
    pub bluetooth_device_address: String,
    #[serde(default = "default_true")]
    pub auto_connect_last_device: bool,
    #[serde(default)]
    pub device_name_filter: String,
    #[serde(default = "default_rssi_threshold")]
    pub rssi_threshold: i16,

    // Heart rate processing
    #[serde(default = "default_heart_rate_min")]
    pub heart_rate_min: u16,
    #[serde(default = "default_heart_rate_max")]
    pub heart_rate_max: u16,
    #[serde(default = "default_false")]
    pub heart_rate_smoothing: bool,
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window_size: usize,

    // Connection
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: f64,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            osc_ip: default_osc_ip(),
            osc_port: default_osc_port(),
            bluetooth_scan_timeout: default_scan_timeout(),
            bluetooth_device_address: String::new(),
            auto_connect_last_device: true,
            device_name_filter: String::new(),
            rssi_threshold: default_rssi_threshold(),
            heart_rate_min: default_heart_rate_min(),
            heart_rate_max: default_heart_rate_max(),
            heart_rate_smoothing: false,
            smoothing_window_size: default_smoothing_window(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay: default_reconnect_delay(),
            keepalive_interval: default_keepalive_interval(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_osc_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_osc_port() -> u16 {
    9000
}
fn default_scan_timeout() -> f64 {
    10.0
}
fn default_rssi_threshold() -> i16 {
    -80
}
fn default_heart_rate_min() -> u16 {
    40
}
fn default_heart_rate_max() -> u16 {
    200
}
fn default_smoothing_window() -> usize {
    5
}
fn default_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_delay() -> f64 {
    5.0
}
fn default_keepalive_interval() -> f64 {
    30.0
}

/// Timing and policy values consumed by the device session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub scan_timeout: Duration,
    pub preset_address: Option<String>,
    pub auto_connect_last_device: bool,
    pub device_name_filter: Option<String>,
    pub rssi_threshold: i16,
    pub bounds: HeartRateBounds,
    pub smoothing: bool,
    pub smoothing_window_size: usize,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Settings::default().session_config()
    }
}

impl Settings {
    /// Apply the recognized environment keys on top of the current values
    ///
    /// `lookup` returns the raw value of a key, if set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OSC_IP") {
            self.osc_ip = v;
        }
        override_parsed(&lookup, "OSC_PORT", &mut self.osc_port)?;
        override_parsed(&lookup, "BLUETOOTH_SCAN_TIMEOUT", &mut self.bluetooth_scan_timeout)?;
        if let Some(v) = lookup("BLUETOOTH_DEVICE_ADDRESS") {
            self.bluetooth_device_address = v;
        }
        override_flag(&lookup, "AUTO_CONNECT_LAST_DEVICE", &mut self.auto_connect_last_device);
        override_parsed(&lookup, "HEART_RATE_MIN", &mut self.heart_rate_min)?;
        override_parsed(&lookup, "HEART_RATE_MAX", &mut self.heart_rate_max)?;
        override_flag(&lookup, "HEART_RATE_SMOOTHING", &mut self.heart_rate_smoothing);
        override_parsed(&lookup, "SMOOTHING_WINDOW_SIZE", &mut self.smoothing_window_size)?;
        override_parsed(&lookup, "RECONNECT_ATTEMPTS", &mut self.reconnect_attempts)?;
        override_parsed(&lookup, "RECONNECT_DELAY", &mut self.reconnect_delay)?;
        override_parsed(&lookup, "KEEPALIVE_INTERVAL", &mut self.keepalive_interval)?;
        if let Some(v) = lookup("DEVICE_NAME_FILTER") {
            self.device_name_filter = v;
        }
        override_parsed(&lookup, "RSSI_THRESHOLD", &mut self.rssi_threshold)?;

        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_settings.level = v.to_lowercase();
        }
        override_flag(&lookup, "LOG_TO_FILE", &mut self.log_settings.file_logging_enabled);
        if let Some(v) = lookup("LOG_FILE_PATH") {
            let path = Path::new(&v);
            if let Some(name) = path.file_name() {
                self.log_settings.file_name = name.to_string_lossy().into_owned();
            }
            self.log_settings.log_dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_string_lossy().into_owned(),
                _ => default_log_dir(),
            };
        }
        Ok(())
    }

    /// Check value ranges, reporting every problem at once
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.osc_port == 0 {
            errors.push(format!("invalid OSC port: {}", self.osc_port));
        }
        if self.heart_rate_min >= self.heart_rate_max {
            errors.push(format!(
                "invalid heart rate range: {}-{}",
                self.heart_rate_min, self.heart_rate_max
            ));
        }
        if self.smoothing_window_size == 0 {
            errors.push(format!(
                "invalid smoothing window size: {}",
                self.smoothing_window_size
            ));
        }

        let min = MIN_INTERVAL.as_secs_f64();
        let max = MAX_INTERVAL.as_secs_f64();
        for (name, value, lower) in [
            ("Bluetooth scan timeout", self.bluetooth_scan_timeout, min),
            ("reconnect delay", self.reconnect_delay, 0.0),
            ("keepalive interval", self.keepalive_interval, min),
        ] {
            if !(lower..=max).contains(&value) {
                errors.push(format!(
                    "invalid {}: {} (expected {}-{}s)",
                    name, value, lower, max
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("configuration validation failed:\n{}", errors.join("\n"))
        }
    }

    pub fn osc_target(&self) -> String {
        format!("{}:{}", self.osc_ip, self.osc_port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            scan_timeout: secs(self.bluetooth_scan_timeout),
            preset_address: non_empty(&self.bluetooth_device_address),
            auto_connect_last_device: self.auto_connect_last_device,
            device_name_filter: non_empty(&self.device_name_filter),
            rssi_threshold: self.rssi_threshold,
            bounds: HeartRateBounds::new(self.heart_rate_min, self.heart_rate_max),
            smoothing: self.heart_rate_smoothing,
            smoothing_window_size: self.smoothing_window_size,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: secs(self.reconnect_delay),
            keepalive_interval: secs(self.keepalive_interval),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

fn override_flag<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().eq_ignore_ascii_case("true");
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load `settings.json` from the config directory, then apply the environment
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::config_dir()?.join(SETTINGS_FILE);
        let mut settings = Self::load_from_file(&settings_path).unwrap_or_default();
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push(APP_DIR);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn device_history_path(&self) -> PathBuf {
        self.settings_path.with_file_name(DEVICE_HISTORY_FILE)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
