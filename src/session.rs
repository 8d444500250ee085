//! Device Session
//!
//! Owns the single BLE link and drives every notification through
//! decode → smooth → map → emit.
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   Idle ─► Scanning ─► Connecting ─► Subscribing ─► Streaming
//!    ▲          ▲            │   ▲          │              │
//!    │          │            ▼   │          ▼              ▼
//!    │          └─────── Failed ◄┼──────────┘        Reconnecting
//!    │                     │     └─────────────────────────┘
//!    └─────────────────────┘ (retries exhausted)
//! ```
//!
//! Attempt counters live in the states themselves so exhaustion is explicit.
//! Every suspension point (scan, selection, connect, subscribe, backoff and
//! the streaming loop) also waits on the [`Shutdown`] signal.

use crate::domain::error::{BridgeError, DiscoveryError, EmitError, LinkLossReason, LinkLost};
use crate::domain::models::{
    AppEvent, ConnectionStatus, DeviceDescriptor, DeviceInfo, HeartRateReading, MessageSeverity,
    StatusMessage,
};
use crate::domain::parameters::{
    OscParameter, OscValue, ParameterMapper, ParameterSnapshot, BLUETOOTH_BATTERY,
};
use crate::domain::registry::{DeviceRecord, DeviceRegistry};
use crate::domain::settings::{SessionConfig, MAX_INTERVAL, MIN_INTERVAL};
use crate::domain::smoothing::SmoothingFilter;
use crate::infrastructure::bluetooth::protocol;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the notification channel between the BLE layer and the session
pub const LINK_CHANNEL_CAPACITY: usize = 64;

/// Event pushed by the BLE layer for the active link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}

/// BLE collaborator: discovery and the single active link
#[async_trait]
pub trait HeartRateSource: Send {
    /// Scan for `timeout` and return every peripheral seen
    async fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, BridgeError>;

    /// Establish the physical link
    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<(), BridgeError>;

    /// Enable Heart Rate Measurement notifications on the connected device
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>, BridgeError>;

    /// Best-effort device information reads
    async fn device_info(&mut self) -> DeviceInfo;

    /// Release the link; a no-op when nothing is connected
    async fn disconnect(&mut self);
}

pub enum Selection {
    Device(DeviceDescriptor),
    Rescan,
    Cancel,
}

/// Picks a device when no remembered device is available
#[async_trait]
pub trait DeviceSelector: Send {
    async fn select(
        &mut self,
        candidates: &[DeviceDescriptor],
        last_device: Option<&DeviceRecord>,
    ) -> Selection;
}

/// Destination of avatar parameters
pub trait ParameterSink: Send {
    /// Send every parameter in order; failures never stop the remaining sends
    fn emit(&mut self, snapshot: &ParameterSnapshot) -> Result<(), EmitError>;

    fn close(&mut self);
}

/// Sending half of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown(rx))
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested or the trigger is gone
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Initial connection after discovery; counts consecutive failures
    Discovery { failures: u32 },
    /// Reconnection to the same address after link loss
    Reconnect { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning {
        round: u32,
        connect_failures: u32,
    },
    Connecting {
        device: DeviceDescriptor,
        retry: Retry,
    },
    Subscribing {
        device: DeviceDescriptor,
        retry: Retry,
    },
    Streaming {
        device: DeviceDescriptor,
    },
    Reconnecting {
        device: DeviceDescriptor,
        attempt: u32,
    },
    Failed {
        device: DeviceDescriptor,
        retry: Retry,
        reason: String,
    },
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Idle,
            Self::Scanning { .. } => ConnectionStatus::Scanning,
            Self::Connecting { .. } => ConnectionStatus::Connecting,
            Self::Subscribing { .. } => ConnectionStatus::Subscribing,
            Self::Streaming { .. } => ConnectionStatus::Streaming,
            Self::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            Self::Failed { .. } => ConnectionStatus::Failed,
        }
    }

    fn initial_scan() -> Self {
        Self::Scanning {
            round: 1,
            connect_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Shutdown signal observed
    Shutdown,
    /// Operator cancelled device selection
    Cancelled,
}

enum Step {
    Next(ConnectionState),
    Stop(SessionExit),
}

/// `start + interval`, saturating at one maximum interval past `start`
fn later(start: Instant, interval: Duration) -> Instant {
    start
        .checked_add(interval)
        .unwrap_or_else(|| start + MAX_INTERVAL)
}

/// Keep candidates passing the RSSI threshold and name filter, strongest first
///
/// A device without an RSSI reading is kept. The preset address bypasses the
/// name filter.
pub fn filter_candidates(
    devices: Vec<DeviceDescriptor>,
    config: &SessionConfig,
) -> Vec<DeviceDescriptor> {
    let name_filter = config.device_name_filter.as_ref().map(|f| f.to_lowercase());

    let mut candidates: Vec<_> = devices
        .into_iter()
        .filter(|d| d.rssi.map_or(true, |rssi| rssi >= config.rssi_threshold))
        .filter(|d| {
            let preset = config
                .preset_address
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(&d.address));
            match &name_filter {
                Some(filter) if !preset => d
                    .name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(filter)),
                _ => true,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
    candidates
}

/// The state machine owning the BLE link, the smoothing window and the sink
pub struct DeviceSession {
    config: SessionConfig,
    state: ConnectionState,
    source: Box<dyn HeartRateSource>,
    selector: Box<dyn DeviceSelector>,
    sink: Box<dyn ParameterSink>,
    registry: Box<dyn DeviceRegistry>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    shutdown: Shutdown,

    filter: SmoothingFilter,
    mapper: ParameterMapper,
    battery: Option<f32>,
    last_device: Option<DeviceRecord>,
    link: Option<mpsc::Receiver<LinkEvent>>,
    link_held: bool,
    sink_open: bool,
}

impl DeviceSession {
    pub fn new(
        config: SessionConfig,
        source: Box<dyn HeartRateSource>,
        selector: Box<dyn DeviceSelector>,
        sink: Box<dyn ParameterSink>,
        registry: Box<dyn DeviceRegistry>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        shutdown: Shutdown,
    ) -> Self {
        let last_device = registry.last_device();
        let filter = Self::fresh_filter(&config);
        Self {
            config,
            state: ConnectionState::Idle,
            source,
            selector,
            sink,
            registry,
            event_sender,
            shutdown,
            filter,
            mapper: ParameterMapper::new(),
            battery: None,
            last_device,
            link: None,
            link_held: false,
            sink_open: true,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Drive the state machine until shutdown or cancellation, then release everything
    pub async fn run(&mut self) -> SessionExit {
        if self.state == ConnectionState::Idle {
            self.set_state(ConnectionState::initial_scan());
        }

        let exit = loop {
            if self.shutdown.is_requested() {
                break SessionExit::Shutdown;
            }

            let step = match self.state.clone() {
                ConnectionState::Idle => self.idle().await,
                ConnectionState::Scanning {
                    round,
                    connect_failures,
                } => self.scan(round, connect_failures).await,
                ConnectionState::Connecting { device, retry } => self.connect(device, retry).await,
                ConnectionState::Subscribing { device, retry } => {
                    self.subscribe(device, retry).await
                }
                ConnectionState::Streaming { device } => self.stream(device).await,
                ConnectionState::Reconnecting { device, attempt } => {
                    self.reconnect(device, attempt).await
                }
                ConnectionState::Failed {
                    device,
                    retry,
                    reason,
                } => self.fail(device, retry, reason).await,
            };

            match step {
                Step::Next(state) => self.set_state(state),
                Step::Stop(exit) => break exit,
            }
        };

        info!("Device session stopping: {:?}", exit);
        self.shutdown().await;
        exit
    }

    /// Release the BLE link and close the sink
    ///
    /// Returns `false` when there was nothing left to release.
    pub async fn shutdown(&mut self) -> bool {
        let mut released = false;

        self.link = None;
        if self.link_held {
            self.source.disconnect().await;
            self.link_held = false;
            released = true;
        }

        if self.sink_open {
            self.emit(&ParameterSnapshot::connection(false));
            self.sink.close();
            self.sink_open = false;
            released = true;
        }

        if self.state != ConnectionState::Idle {
            self.set_state(ConnectionState::Idle);
        }
        released
    }

    async fn idle(&mut self) -> Step {
        if !self.pause(self.config.reconnect_delay).await {
            return Step::Stop(SessionExit::Shutdown);
        }
        Step::Next(ConnectionState::initial_scan())
    }

    async fn scan(&mut self, round: u32, connect_failures: u32) -> Step {
        info!(
            "Scanning for heart rate devices ({:.1}s, round {}/{})",
            self.config.scan_timeout.as_secs_f64(),
            round,
            self.attempt_limit()
        );

        let timeout = self.config.scan_timeout;
        let result = tokio::select! {
            _ = self.shutdown.requested() => return Step::Stop(SessionExit::Shutdown),
            result = self.source.scan(timeout) => result,
        };

        let found = match result {
            Ok(found) => found,
            Err(e) => {
                warn!("Scan failed: {}", e);
                Vec::new()
            }
        };
        let seen = found.len();
        let candidates = filter_candidates(found, &self.config);
        info!("Scan complete: {} device(s), {} candidate(s)", seen, candidates.len());

        if candidates.is_empty() {
            if round >= self.attempt_limit() {
                self.surface(DiscoveryError::NoMatchingDevice { rounds: round });
                return Step::Next(ConnectionState::Idle);
            }
            return Step::Next(ConnectionState::Scanning {
                round: round + 1,
                connect_failures,
            });
        }

        let retry = Retry::Discovery {
            failures: connect_failures,
        };

        if let Some(address) = self.preferred_address() {
            if let Some(device) = candidates
                .iter()
                .find(|d| d.address.eq_ignore_ascii_case(&address))
            {
                info!(
                    "Auto-connecting to {} ({})",
                    device.display_name(),
                    device.address
                );
                return Step::Next(ConnectionState::Connecting {
                    device: device.clone(),
                    retry,
                });
            }
        }

        let selection = tokio::select! {
            _ = self.shutdown.requested() => return Step::Stop(SessionExit::Shutdown),
            selection = self.selector.select(&candidates, self.last_device.as_ref()) => selection,
        };

        match selection {
            Selection::Device(device) => Step::Next(ConnectionState::Connecting { device, retry }),
            Selection::Rescan => Step::Next(ConnectionState::Scanning {
                round: 1,
                connect_failures,
            }),
            Selection::Cancel => Step::Stop(SessionExit::Cancelled),
        }
    }

    async fn connect(&mut self, device: DeviceDescriptor, retry: Retry) -> Step {
        if self.link_held {
            self.release_link().await;
        }

        info!("Connecting to {} ({})", device.display_name(), device.address);
        self.link_held = true;

        let result = tokio::select! {
            _ = self.shutdown.requested() => return Step::Stop(SessionExit::Shutdown),
            result = self.source.connect(&device) => result,
        };

        match result {
            Ok(()) => Step::Next(ConnectionState::Subscribing { device, retry }),
            Err(e) => Step::Next(ConnectionState::Failed {
                device,
                retry,
                reason: e.to_string(),
            }),
        }
    }

    async fn subscribe(&mut self, device: DeviceDescriptor, retry: Retry) -> Step {
        let result = tokio::select! {
            _ = self.shutdown.requested() => return Step::Stop(SessionExit::Shutdown),
            result = self.source.subscribe() => result,
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                return Step::Next(ConnectionState::Failed {
                    device,
                    retry,
                    reason: e.to_string(),
                })
            }
        };

        let info = tokio::select! {
            _ = self.shutdown.requested() => return Step::Stop(SessionExit::Shutdown),
            info = self.source.device_info() => info,
        };

        // Smoothing history never crosses a connection boundary
        self.filter = Self::fresh_filter(&self.config);
        self.battery = info.battery_fraction();
        self.link = Some(link);

        if let Err(e) = self.registry.set_last_device(&device) {
            warn!("Failed to save device history: {}", e);
        }
        self.last_device = self.registry.last_device();

        info!(
            "Heart rate notifications enabled for {} ({}), battery: {}",
            info.name.as_deref().unwrap_or(device.display_name()),
            device.address,
            info.battery_level
                .map(|b| format!("{}%", b))
                .unwrap_or_else(|| "unknown".to_string())
        );
        self.send_event(AppEvent::DeviceReady {
            device: device.clone(),
            info,
        });

        Step::Next(ConnectionState::Streaming { device })
    }

    async fn stream(&mut self, device: DeviceDescriptor) -> Step {
        let Some(mut link) = self.link.take() else {
            return self.link_lost(device, LinkLossReason::StreamClosed).await;
        };

        let mut connected = ParameterSnapshot::connection(true);
        if let Some(fraction) = self.battery {
            connected
                .parameters
                .push(OscParameter::new(BLUETOOTH_BATTERY, OscValue::Float(fraction)));
        }
        self.emit(&connected);

        let interval = self
            .config
            .keepalive_interval
            .clamp(MIN_INTERVAL, MAX_INTERVAL);
        let mut deadline = later(Instant::now(), interval);
        let mut keepalive = time::interval_at(later(Instant::now(), interval), interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.requested() => {
                    self.link = Some(link);
                    return Step::Stop(SessionExit::Shutdown);
                }
                event = link.recv() => match event {
                    Some(LinkEvent::Notification(bytes)) => {
                        let received = self.process_notification(&bytes).unwrap_or_else(Instant::now);
                        deadline = later(received, interval);
                    }
                    Some(LinkEvent::Disconnected) => {
                        return self.link_lost(device, LinkLossReason::Disconnected).await;
                    }
                    None => return self.link_lost(device, LinkLossReason::StreamClosed).await,
                },
                _ = time::sleep_until(deadline) => {
                    return self.link_lost(device, LinkLossReason::KeepaliveTimeout).await;
                }
                _ = keepalive.tick() => {
                    debug!("Sending OSC keepalive");
                    self.emit(&ParameterSnapshot::connection(true));
                }
            }
        }
    }

    /// Decode → smooth → map → emit for one notification
    ///
    /// Returns the capture time of the decoded sample.
    fn process_notification(&mut self, bytes: &[u8]) -> Option<Instant> {
        let sample = match protocol::parse_measurement(bytes) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Dropping heart rate notification {:02X?}: {}", bytes, e);
                return None;
            }
        };

        if sample.sensor_contact_supported && !sample.sensor_contact_detected {
            debug!("Sensor reports no skin contact");
        }

        let bpm = sample.beats_per_minute;
        let Some(rate) = self.filter.push(bpm) else {
            debug!(
                "Heart rate {} outside {}-{}, ignored",
                bpm, self.config.bounds.min, self.config.bounds.max
            );
            return Some(sample.timestamp);
        };

        let snapshot = self.mapper.map(rate, true, self.battery);
        self.emit(&snapshot);

        debug!(
            "Heart rate {} bpm forwarded as {:.1} (energy: {:?}, rr: {:?})",
            bpm, rate.mean, sample.energy_expended, sample.rr_intervals
        );
        self.send_event(AppEvent::HeartRate(HeartRateReading {
            raw_bpm: bpm,
            forwarded_bpm: rate.whole(),
        }));
        Some(sample.timestamp)
    }

    async fn link_lost(&mut self, device: DeviceDescriptor, reason: LinkLossReason) -> Step {
        warn!("{} ({})", LinkLost { reason }, device.address);
        self.emit(&ParameterSnapshot::connection(false));
        self.release_link().await;
        Step::Next(ConnectionState::Reconnecting { device, attempt: 1 })
    }

    async fn reconnect(&mut self, device: DeviceDescriptor, attempt: u32) -> Step {
        info!(
            "Reconnecting to {} in {:.1}s (attempt {}/{})",
            device.address,
            self.config.reconnect_delay.as_secs_f64(),
            attempt,
            self.attempt_limit()
        );
        if !self.pause(self.config.reconnect_delay).await {
            return Step::Stop(SessionExit::Shutdown);
        }
        Step::Next(ConnectionState::Connecting {
            device,
            retry: Retry::Reconnect { attempt },
        })
    }

    async fn fail(&mut self, device: DeviceDescriptor, retry: Retry, reason: String) -> Step {
        warn!("Connection to {} failed: {}", device.address, reason);
        self.release_link().await;
        self.send_log(
            "Connection failed: make sure the device is not connected to a phone and is close to this computer",
            MessageSeverity::Warning,
        );

        let limit = self.attempt_limit();
        match retry {
            Retry::Discovery { failures } => {
                let failures = failures + 1;
                if failures >= limit {
                    self.surface(DiscoveryError::ConnectionExhausted {
                        address: device.address,
                        attempts: failures,
                        last_error: reason,
                    });
                    return Step::Next(ConnectionState::Idle);
                }
                if !self.pause(self.config.reconnect_delay).await {
                    return Step::Stop(SessionExit::Shutdown);
                }
                Step::Next(ConnectionState::Scanning {
                    round: 1,
                    connect_failures: failures,
                })
            }
            Retry::Reconnect { attempt } => {
                if attempt >= limit {
                    self.surface(DiscoveryError::ConnectionExhausted {
                        address: device.address,
                        attempts: attempt,
                        last_error: reason,
                    });
                    return Step::Next(ConnectionState::Idle);
                }
                Step::Next(ConnectionState::Reconnecting {
                    device,
                    attempt: attempt + 1,
                })
            }
        }
    }

    async fn release_link(&mut self) {
        self.link = None;
        if self.link_held {
            self.source.disconnect().await;
            self.link_held = false;
        }
    }

    /// Sleep unless shutdown arrives first; returns `false` on shutdown
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.requested() => false,
            _ = time::sleep(duration) => true,
        }
    }

    fn preferred_address(&self) -> Option<String> {
        if let Some(preset) = &self.config.preset_address {
            return Some(preset.clone());
        }
        if self.config.auto_connect_last_device {
            return self.last_device.as_ref().map(|d| d.address.clone());
        }
        None
    }

    fn attempt_limit(&self) -> u32 {
        self.config.reconnect_attempts.max(1)
    }

    fn fresh_filter(config: &SessionConfig) -> SmoothingFilter {
        SmoothingFilter::new(config.bounds, config.smoothing, config.smoothing_window_size)
    }

    fn set_state(&mut self, state: ConnectionState) {
        let status = state.status();
        if status != self.state.status() {
            info!("Session state: {:?} -> {:?}", self.state.status(), status);
        }
        self.state = state;
        self.send_event(AppEvent::ConnectionStatus(status));
    }

    fn emit(&mut self, snapshot: &ParameterSnapshot) {
        if !self.sink_open {
            return;
        }
        if let Err(e) = self.sink.emit(snapshot) {
            warn!("Failed to send OSC parameters: {}", e);
        }
    }

    fn surface(&mut self, err: DiscoveryError) {
        error!("{}", err);
        self.send_event(AppEvent::DiscoveryFailed(err));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        self.send_event(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    fn send_event(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }
}
