//! Console presentation: startup banner, device picker and the live event feed

use crate::domain::models::{AppEvent, ConnectionStatus, DeviceDescriptor, MessageSeverity};
use crate::domain::registry::DeviceRecord;
use crate::domain::settings::Settings;
use crate::session::{DeviceSelector, Selection};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::warn;

pub fn print_banner(settings: &Settings, settings_path: &Path) {
    let on_off = |flag: bool| if flag { "on" } else { "off" };

    println!("==============================================");
    println!("  Bluetooth Heart Rate -> OSC");
    println!("==============================================");
    println!("  Settings file     : {}", settings_path.display());
    println!("  OSC target        : {}", settings.osc_target());
    println!("  Scan timeout      : {:.1}s", settings.bluetooth_scan_timeout);
    if !settings.bluetooth_device_address.is_empty() {
        println!("  Device address    : {}", settings.bluetooth_device_address);
    }
    if !settings.device_name_filter.is_empty() {
        println!("  Name filter       : {}", settings.device_name_filter);
    }
    println!("  RSSI threshold    : {} dBm", settings.rssi_threshold);
    println!(
        "  Heart rate range  : {}-{} bpm",
        settings.heart_rate_min, settings.heart_rate_max
    );
    println!(
        "  Smoothing         : {} (window {})",
        on_off(settings.heart_rate_smoothing),
        settings.smoothing_window_size
    );
    println!(
        "  Reconnect         : {} attempt(s), {:.1}s delay",
        settings.reconnect_attempts, settings.reconnect_delay
    );
    println!("  Keepalive         : {:.1}s", settings.keepalive_interval);
    println!(
        "  Auto-connect last : {}",
        on_off(settings.auto_connect_last_device)
    );
    println!("==============================================");
    println!("Press Ctrl+C to stop");
    println!();
}

/// One line of operator input at the device prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Index(usize),
    Rescan,
    Quit,
}

fn parse_choice(input: &str, count: usize) -> Option<Choice> {
    let input = input.trim();
    if input.is_empty() {
        return Some(Choice::Rescan);
    }
    if input.eq_ignore_ascii_case("q") {
        return Some(Choice::Quit);
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(Choice::Index(n - 1)),
        _ => None,
    }
}

fn format_candidate(index: usize, device: &DeviceDescriptor, last: Option<&DeviceRecord>) -> String {
    let rssi = device
        .rssi
        .map(|r| format!("{} dBm", r))
        .unwrap_or_else(|| "n/a".to_string());
    let marker = match last {
        Some(record) if record.address.eq_ignore_ascii_case(&device.address) => "  (last used)",
        _ => "",
    };
    format!(
        "  {:>2}. {} [{}] RSSI: {}{}",
        index + 1,
        device.display_name(),
        device.address,
        rssi,
        marker
    )
}

/// Interactive picker reading choices line by line
pub struct ConsoleSelector<R> {
    lines: Lines<R>,
}

impl ConsoleSelector<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleSelector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DeviceSelector for ConsoleSelector<R> {
    async fn select(
        &mut self,
        candidates: &[DeviceDescriptor],
        last_device: Option<&DeviceRecord>,
    ) -> Selection {
        println!();
        println!("Found {} heart rate device(s):", candidates.len());
        for (i, device) in candidates.iter().enumerate() {
            println!("{}", format_candidate(i, device, last_device));
        }
        if let Some(last) = last_device {
            println!(
                "Last used: {} [{}] at {}",
                last.name,
                last.address,
                last.last_connected.format("%Y-%m-%d %H:%M")
            );
        }

        loop {
            println!(
                "Select a device (1-{}), Enter to rescan, q to quit:",
                candidates.len()
            );
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Selection::Cancel,
                Err(e) => {
                    warn!("Failed to read selection: {}", e);
                    return Selection::Cancel;
                }
            };

            match parse_choice(&line, candidates.len()) {
                Some(Choice::Index(i)) => return Selection::Device(candidates[i].clone()),
                Some(Choice::Rescan) => return Selection::Rescan,
                Some(Choice::Quit) => return Selection::Cancel,
                None => println!("Invalid choice: {}", line.trim()),
            }
        }
    }
}

/// Render an event for the console, if it is worth a line
pub fn format_event(event: &AppEvent, now: DateTime<Local>) -> Option<String> {
    match event {
        AppEvent::HeartRate(reading) => Some(format!(
            "💓 [{}] {} bpm",
            now.format("%H:%M:%S"),
            reading.forwarded_bpm
        )),
        AppEvent::ConnectionStatus(status) => match status {
            ConnectionStatus::Scanning => Some("🔍 Scanning for heart rate devices...".to_string()),
            ConnectionStatus::Connecting => Some("🔗 Connecting...".to_string()),
            ConnectionStatus::Streaming => Some("✅ Receiving heart rate data".to_string()),
            ConnectionStatus::Reconnecting => Some("🔄 Connection lost, reconnecting...".to_string()),
            _ => None,
        },
        AppEvent::DeviceReady { device, info } => {
            let mut line = format!("📱 Connected to {} [{}]", device.display_name(), device.address);
            if let Some(manufacturer) = &info.manufacturer {
                line.push_str(&format!(", {}", manufacturer));
            }
            if let Some(model) = &info.model {
                line.push_str(&format!(" {}", model));
            }
            if let Some(level) = info.battery_level {
                line.push_str(&format!(", battery {}%", level));
            }
            Some(line)
        }
        AppEvent::DiscoveryFailed(err) => Some(format!(
            "❌ {}\n💡 Make sure the device is on, worn, not connected to a phone and close to this computer",
            err
        )),
        AppEvent::LogMessage(message) => {
            let icon = match message.severity {
                MessageSeverity::Info => "ℹ️",
                MessageSeverity::Success => "✅",
                MessageSeverity::Warning => "⚠️",
                MessageSeverity::Error => "❌",
            };
            Some(format!("{} {}", icon, message.message))
        }
    }
}

/// Print events until every sender is gone
pub async fn print_events(mut events: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = events.recv().await {
        if let Some(line) = format_event(&event, Local::now()) {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DiscoveryError;
    use crate::domain::models::HeartRateReading;
    use chrono::TimeZone;

    fn candidates() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor {
                address: "AA:AA:AA:AA:AA:01".to_string(),
                name: Some("Polar H10".to_string()),
                rssi: Some(-50),
            },
            DeviceDescriptor {
                address: "AA:AA:AA:AA:AA:02".to_string(),
                name: None,
                rssi: None,
            },
        ]
    }

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("2", 2), Some(Choice::Index(1)));
        assert_eq!(parse_choice(" 1 ", 2), Some(Choice::Index(0)));
        assert_eq!(parse_choice("", 2), Some(Choice::Rescan));
        assert_eq!(parse_choice("Q", 2), Some(Choice::Quit));
        assert_eq!(parse_choice("3", 2), None);
        assert_eq!(parse_choice("0", 2), None);
        assert_eq!(parse_choice("abc", 2), None);
    }

    #[test]
    fn test_candidate_line_marks_last_used() {
        let record = DeviceRecord {
            address: "aa:aa:aa:aa:aa:01".to_string(),
            name: "Polar H10".to_string(),
            last_connected: Local::now(),
        };
        let devices = candidates();
        let line = format_candidate(0, &devices[0], Some(&record));
        assert!(line.contains("Polar H10"));
        assert!(line.contains("-50 dBm"));
        assert!(line.ends_with("(last used)"));

        let line = format_candidate(1, &devices[1], Some(&record));
        assert!(line.contains("Unknown device"));
        assert!(line.contains("n/a"));
    }

    #[tokio::test]
    async fn test_selector_skips_invalid_input() {
        let mut selector = ConsoleSelector::new(&b"7\nnope\n2\n"[..]);
        match selector.select(&candidates(), None).await {
            Selection::Device(device) => assert_eq!(device.address, "AA:AA:AA:AA:AA:02"),
            _ => panic!("expected a device"),
        }
    }

    #[tokio::test]
    async fn test_selector_rescan_and_quit() {
        let mut selector = ConsoleSelector::new(&b"\nq\n"[..]);
        assert!(matches!(
            selector.select(&candidates(), None).await,
            Selection::Rescan
        ));
        assert!(matches!(
            selector.select(&candidates(), None).await,
            Selection::Cancel
        ));
        // End of input
        assert!(matches!(
            selector.select(&candidates(), None).await,
            Selection::Cancel
        ));
    }

    #[tokio::test]
    async fn test_selector_cancels_on_unreadable_input() {
        let mut selector = ConsoleSelector::new(&b"\xff\xfe\n"[..]);
        assert!(matches!(
            selector.select(&candidates(), None).await,
            Selection::Cancel
        ));
    }

    #[test]
    fn test_heart_rate_line() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 21, 7, 3).unwrap();
        let line = format_event(
            &AppEvent::HeartRate(HeartRateReading {
                raw_bpm: 73,
                forwarded_bpm: 72,
            }),
            now,
        );
        assert_eq!(line.as_deref(), Some("💓 [21:07:03] 72 bpm"));
    }

    #[test]
    fn test_discovery_failure_includes_hint() {
        let line = format_event(
            &AppEvent::DiscoveryFailed(DiscoveryError::NoMatchingDevice { rounds: 3 }),
            Local::now(),
        )
        .unwrap();
        assert!(line.contains("3 scan(s)"));
        assert!(line.contains("not connected to a phone"));
    }
}
