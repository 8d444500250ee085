//! Error taxonomy for the heart-rate bridge.
//!
//! Sample-level errors ([`DecodeError`], [`EmitError`]) are absorbed where
//! they are detected. Session-level errors ([`ConnectionError`], [`LinkLost`])
//! are absorbed by the session retry policy. Only [`DiscoveryError`] reaches
//! the operator.

use std::fmt;
use thiserror::Error;

/// Malformed Heart Rate Measurement payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty heart rate payload")]
    Empty,

    #[error("heart rate payload truncated: {field} needs {needed} bytes, got {actual}")]
    Truncated {
        field: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Link establishment or subscription failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Bluetooth adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("BLE scan failed: {0}")]
    Scan(String),

    #[error("device {address} not found")]
    DeviceNotFound { address: String },

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("heart rate measurement characteristic not found")]
    CharacteristicNotFound,

    #[error("failed to subscribe to notifications: {0}")]
    Subscribe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLossReason {
    /// The BLE layer reported a disconnect
    Disconnected,
    /// The notification stream ended
    StreamClosed,
    /// No notification within the keepalive interval
    KeepaliveTimeout,
}

impl fmt::Display for LinkLossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "device disconnected"),
            Self::StreamClosed => write!(f, "notification stream closed"),
            Self::KeepaliveTimeout => write!(f, "keepalive timeout"),
        }
    }
}

/// Mid-stream loss of an established link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("link lost: {reason}")]
pub struct LinkLost {
    pub reason: LinkLossReason,
}

/// No usable device after exhausting retries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("no matching heart rate device found after {rounds} scan(s)")]
    NoMatchingDevice { rounds: u32 },

    #[error("could not connect to {address} after {attempts} attempt(s): {last_error}")]
    ConnectionExhausted {
        address: String,
        attempts: u32,
        last_error: String,
    },
}

/// OSC/UDP send failure
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("UDP send failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("OSC encoding failed: {0}")]
    Encode(String),

    #[error("OSC emitter is closed")]
    Closed,
}

/// Errors crossing the BLE backend seam
///
/// Losing an established link is not an error here: the backend reports it
/// as a [`LinkEvent`](crate::session::LinkEvent) on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
