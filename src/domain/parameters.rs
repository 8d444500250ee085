//! Avatar Parameter Mapping
//!
//! Turns one accepted heart rate into the fixed set of avatar parameters.
//!
//! ```text
//! /avatar/parameters/Heartrate            float  bpm/127 - 1
//! /avatar/parameters/HeartRateFloat       float  bpm/127 - 1
//! /avatar/parameters/Heartrate2           float  bpm/255
//! /avatar/parameters/HeartRateFloat01     float  bpm/255
//! /avatar/parameters/Heartrate3           int    bpm
//! /avatar/parameters/HeartRateInt         int    bpm
//! /avatar/parameters/HeartBeatToggle      bool   alternates per sample
//! /avatar/parameters/BluetoothHRConnected bool   session is streaming
//! /avatar/parameters/BluetoothBattery     float  battery 0.0-1.0 (if known)
//! ```

use crate::domain::smoothing::RateEstimate;

pub const HEARTRATE: &str = "/avatar/parameters/Heartrate";
pub const HEARTRATE_FLOAT: &str = "/avatar/parameters/HeartRateFloat";
pub const HEARTRATE2: &str = "/avatar/parameters/Heartrate2";
pub const HEARTRATE_FLOAT01: &str = "/avatar/parameters/HeartRateFloat01";
pub const HEARTRATE3: &str = "/avatar/parameters/Heartrate3";
pub const HEARTRATE_INT: &str = "/avatar/parameters/HeartRateInt";
pub const HEARTBEAT_TOGGLE: &str = "/avatar/parameters/HeartBeatToggle";
pub const BLUETOOTH_CONNECTED: &str = "/avatar/parameters/BluetoothHRConnected";
pub const BLUETOOTH_BATTERY: &str = "/avatar/parameters/BluetoothBattery";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OscValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscParameter {
    pub address: &'static str,
    pub value: OscValue,
}

impl OscParameter {
    pub fn new(address: &'static str, value: OscValue) -> Self {
        Self { address, value }
    }
}

/// Every parameter computed from one sample, in emission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSnapshot {
    pub parameters: Vec<OscParameter>,
}

impl ParameterSnapshot {
    /// Snapshot carrying only the connection flag
    pub fn connection(connected: bool) -> Self {
        Self {
            parameters: vec![OscParameter::new(
                BLUETOOTH_CONNECTED,
                OscValue::Bool(connected),
            )],
        }
    }

    pub fn get(&self, address: &str) -> Option<OscValue> {
        self.parameters
            .iter()
            .find(|p| p.address == address)
            .map(|p| p.value)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Maps heart rate values to avatar parameters
///
/// The only state is the heartbeat toggle, which flips after every mapped sample.
#[derive(Debug, Default)]
pub struct ParameterMapper {
    beat_toggle: bool,
}

impl ParameterMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(
        &mut self,
        rate: RateEstimate,
        streaming: bool,
        battery: Option<f32>,
    ) -> ParameterSnapshot {
        let bpm = rate.mean;
        let whole = rate.whole();
        let centered = bpm / 127.0 - 1.0;
        let unit = bpm / 255.0;

        let mut parameters = vec![
            OscParameter::new(HEARTRATE, OscValue::Float(centered)),
            OscParameter::new(HEARTRATE_FLOAT, OscValue::Float(centered)),
            OscParameter::new(HEARTRATE2, OscValue::Float(unit)),
            OscParameter::new(HEARTRATE_FLOAT01, OscValue::Float(unit)),
            OscParameter::new(HEARTRATE3, OscValue::Int(whole)),
            OscParameter::new(HEARTRATE_INT, OscValue::Int(whole)),
            OscParameter::new(HEARTBEAT_TOGGLE, OscValue::Bool(self.beat_toggle)),
            OscParameter::new(BLUETOOTH_CONNECTED, OscValue::Bool(streaming)),
        ];
        if let Some(fraction) = battery {
            parameters.push(OscParameter::new(
                BLUETOOTH_BATTERY,
                OscValue::Float(fraction),
            ));
        }

        self.beat_toggle = !self.beat_toggle;
        ParameterSnapshot { parameters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(mean: f32) -> RateEstimate {
        RateEstimate { mean }
    }

    fn float(snapshot: &ParameterSnapshot, address: &str) -> f32 {
        match snapshot.get(address) {
            Some(OscValue::Float(v)) => v,
            other => panic!("{} is not a float: {:?}", address, other),
        }
    }

    #[test]
    fn test_map_80_bpm() {
        let mut mapper = ParameterMapper::new();
        let snapshot = mapper.map(rate(80.0), true, None);

        assert!((float(&snapshot, HEARTRATE) - (80.0 / 127.0 - 1.0)).abs() < 1e-6);
        assert!((float(&snapshot, HEARTRATE) - (-0.370_157_4)).abs() < 1e-4);
        assert_eq!(float(&snapshot, HEARTRATE), float(&snapshot, HEARTRATE_FLOAT));
        assert!((float(&snapshot, HEARTRATE2) - 80.0 / 255.0).abs() < 1e-6);
        assert_eq!(snapshot.get(HEARTRATE3), Some(OscValue::Int(80)));
        assert_eq!(snapshot.get(HEARTRATE_INT), Some(OscValue::Int(80)));
        assert_eq!(snapshot.get(BLUETOOTH_CONNECTED), Some(OscValue::Bool(true)));
        assert_eq!(snapshot.get(BLUETOOTH_BATTERY), None);
        assert_eq!(snapshot.len(), 8);
    }

    #[test]
    fn test_smoothed_mean_keeps_float_precision() {
        let mut mapper = ParameterMapper::new();
        let snapshot = mapper.map(rate(60.8), true, None);
        assert_eq!(snapshot.get(HEARTRATE3), Some(OscValue::Int(60)));
        assert!((float(&snapshot, HEARTRATE2) - 60.8 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_heartbeat_toggle_alternates() {
        let mut mapper = ParameterMapper::new();
        let toggles: Vec<_> = (0..4)
            .map(|_| mapper.map(rate(70.0), true, None).get(HEARTBEAT_TOGGLE))
            .collect();
        assert_eq!(
            toggles,
            vec![
                Some(OscValue::Bool(false)),
                Some(OscValue::Bool(true)),
                Some(OscValue::Bool(false)),
                Some(OscValue::Bool(true)),
            ]
        );
    }

    #[test]
    fn test_battery_is_last_when_present() {
        let mut mapper = ParameterMapper::new();
        let snapshot = mapper.map(rate(70.0), false, Some(0.85));
        let last = snapshot.parameters.last().unwrap();
        assert_eq!(last.address, BLUETOOTH_BATTERY);
        assert_eq!(last.value, OscValue::Float(0.85));
        assert_eq!(snapshot.get(BLUETOOTH_CONNECTED), Some(OscValue::Bool(false)));
    }

    #[test]
    fn test_connection_snapshot() {
        let snapshot = ParameterSnapshot::connection(false);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(BLUETOOTH_CONNECTED), Some(OscValue::Bool(false)));
    }
}
