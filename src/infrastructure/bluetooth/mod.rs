//! Bluetooth Module
//!
//! BLE access to standard Heart Rate Service devices.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │        (HeartRateSource used by the device session)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌────────────┐
//! │  Scanner  │  │ Connection │  │  Protocol  │
//! │           │  │            │  │            │
//! │ - timed   │  │ - GATT     │  │ - UUIDs    │
//! │   scan    │  │ - notify   │  │ - 0x2A37   │
//! │ - filter  │  │   forwarder│  │   decoding │
//! └───────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and measurement decoding
//! - [`scanner`] - Discovery and candidate heuristics
//! - [`connection`] - Link setup, subscription and device info reads
//! - [`service`] - Adapter owner implementing the session's source

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;

pub use service::BluetoothService;
