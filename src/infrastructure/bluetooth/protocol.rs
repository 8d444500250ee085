//! Bluetooth Heart Rate Service Protocol
//!
//! GATT identifiers for the standard Heart Rate Service and the decoder for
//! the Heart Rate Measurement characteristic.

use crate::domain::error::DecodeError;
use crate::domain::models::HeartRateSample;
use btleplug::api::bleuuid::uuid_from_u16;
use tokio::time::Instant;
use uuid::Uuid;

/// Heart Rate Service (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);

/// Heart Rate Measurement characteristic (0x2A37), notify only
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

/// Battery Level characteristic (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = uuid_from_u16(0x2A19);

/// Device Name characteristic (0x2A00)
pub const DEVICE_NAME_UUID: Uuid = uuid_from_u16(0x2A00);

/// Manufacturer Name String characteristic (0x2A29)
pub const MANUFACTURER_NAME_UUID: Uuid = uuid_from_u16(0x2A29);

/// Model Number String characteristic (0x2A24)
pub const MODEL_NUMBER_UUID: Uuid = uuid_from_u16(0x2A24);

/// Flag bits of the first measurement byte
pub mod flags {
    /// Heart rate value is a u16 instead of a u8
    pub const VALUE_FORMAT_U16: u8 = 0x01;
    /// Sensor contact detected
    pub const CONTACT_DETECTED: u8 = 0x02;
    /// Sensor contact feature supported
    pub const CONTACT_SUPPORTED: u8 = 0x04;
    /// Energy expended field present
    pub const ENERGY_EXPENDED: u8 = 0x08;
    /// One or more RR-interval values present
    pub const RR_INTERVALS: u8 = 0x10;
}

/// Parse a Heart Rate Measurement notification
///
/// # Payload Structure
///
/// ```text
/// [0]      : Flags
///            bit 0: heart rate value format (0 = u8, 1 = u16)
///            bit 1: sensor contact detected
///            bit 2: sensor contact supported
///            bit 3: energy expended present
///            bit 4: RR-intervals present
/// [1] or [1-2]   : Heart rate (u8, or u16 little-endian)
/// [+2]           : Energy expended in kJ (u16 little-endian, optional)
/// [+2 * n]       : RR-intervals in 1/1024 s (u16 little-endian, optional)
/// ```
///
/// A trailing odd byte after the RR-intervals is ignored.
pub fn parse_measurement(bytes: &[u8]) -> Result<HeartRateSample, DecodeError> {
    let (&flag_byte, mut rest) = bytes.split_first().ok_or(DecodeError::Empty)?;

    let beats_per_minute = if flag_byte & flags::VALUE_FORMAT_U16 != 0 {
        take_u16(&mut rest, "heart rate (u16)", bytes.len())?
    } else {
        let (&value, tail) = rest.split_first().ok_or(DecodeError::Truncated {
            field: "heart rate (u8)",
            needed: 2,
            actual: bytes.len(),
        })?;
        rest = tail;
        u16::from(value)
    };

    let energy_expended = if flag_byte & flags::ENERGY_EXPENDED != 0 {
        Some(take_u16(&mut rest, "energy expended", bytes.len())?)
    } else {
        None
    };

    let rr_intervals = if flag_byte & flags::RR_INTERVALS != 0 {
        rest.chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    } else {
        Vec::new()
    };

    Ok(HeartRateSample {
        beats_per_minute,
        sensor_contact_supported: flag_byte & flags::CONTACT_SUPPORTED != 0,
        sensor_contact_detected: flag_byte & flags::CONTACT_DETECTED != 0,
        energy_expended,
        rr_intervals,
        timestamp: Instant::now(),
    })
}

fn take_u16(rest: &mut &[u8], field: &'static str, total: usize) -> Result<u16, DecodeError> {
    if rest.len() < 2 {
        return Err(DecodeError::Truncated {
            field,
            needed: total - rest.len() + 2,
            actual: total,
        });
    }
    let value = u16::from_le_bytes([rest[0], rest[1]]);
    *rest = &rest[2..];
    Ok(value)
}

/// Encode a sample into the Heart Rate Measurement wire format
///
/// The 16-bit value format is chosen only when the heart rate does not fit a u8.
#[cfg(test)]
pub fn encode_measurement(sample: &HeartRateSample) -> Vec<u8> {
    let mut flag_byte = 0u8;
    let mut bytes = vec![0u8];

    if let Ok(value) = u8::try_from(sample.beats_per_minute) {
        bytes.push(value);
    } else {
        flag_byte |= flags::VALUE_FORMAT_U16;
        bytes.extend_from_slice(&sample.beats_per_minute.to_le_bytes());
    }

    if sample.sensor_contact_supported {
        flag_byte |= flags::CONTACT_SUPPORTED;
        if sample.sensor_contact_detected {
            flag_byte |= flags::CONTACT_DETECTED;
        }
    }

    if let Some(energy) = sample.energy_expended {
        flag_byte |= flags::ENERGY_EXPENDED;
        bytes.extend_from_slice(&energy.to_le_bytes());
    }

    if !sample.rr_intervals.is_empty() {
        flag_byte |= flags::RR_INTERVALS;
        for rr in &sample.rr_intervals {
            bytes.extend_from_slice(&rr.to_le_bytes());
        }
    }

    bytes[0] = flag_byte;
    bytes
}

/// Parse a Battery Level characteristic value (percent)
pub fn parse_battery_level(bytes: &[u8]) -> Option<u8> {
    bytes.first().map(|level| (*level).min(100))
}

/// Parse a UTF-8 string characteristic, trimming padding
pub fn parse_string_characteristic(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_u8_heart_rate() {
        let parsed = parse_measurement(&[0x00, 72]).unwrap();
        assert_eq!(parsed.beats_per_minute, 72);
        assert!(!parsed.sensor_contact_supported);
        assert_eq!(parsed.energy_expended, None);
        assert!(parsed.rr_intervals.is_empty());
    }

    #[test]
    fn test_parse_u16_heart_rate() {
        let parsed = parse_measurement(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(parsed.beats_per_minute, 300);
    }

    #[test]
    fn test_parse_contact_bits() {
        let parsed = parse_measurement(&[0x06, 65]).unwrap();
        assert!(parsed.sensor_contact_supported);
        assert!(parsed.sensor_contact_detected);

        let parsed = parse_measurement(&[0x04, 65]).unwrap();
        assert!(parsed.sensor_contact_supported);
        assert!(!parsed.sensor_contact_detected);
    }

    #[test]
    fn test_parse_energy_and_rr_intervals() {
        // u8 HR, energy 0x0102, RR 1024 and 980
        let payload = [0x18, 90, 0x02, 0x01, 0x00, 0x04, 0xD4, 0x03];
        let parsed = parse_measurement(&payload).unwrap();
        assert_eq!(parsed.beats_per_minute, 90);
        assert_eq!(parsed.energy_expended, Some(0x0102));
        assert_eq!(parsed.rr_intervals, vec![1024, 980]);
    }

    #[test]
    fn test_rr_flag_without_values_is_empty() {
        let parsed = parse_measurement(&[0x10, 70]).unwrap();
        assert!(parsed.rr_intervals.is_empty());
    }

    #[test]
    fn test_truncated_payloads() {
        assert_eq!(parse_measurement(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            parse_measurement(&[0x00]),
            Err(DecodeError::Truncated { .. })
        ));
        // 16-bit value announced but only one value byte
        assert!(matches!(
            parse_measurement(&[0x01, 0x50]),
            Err(DecodeError::Truncated { needed: 3, actual: 2, .. })
        ));
        // Energy announced but missing
        assert!(matches!(
            parse_measurement(&[0x08, 80, 0x01]),
            Err(DecodeError::Truncated {
                field: "energy expended",
                ..
            })
        ));
    }

    #[test]
    fn test_encode_then_decode() {
        let widths: [(u16, u8); 2] = [(72, 0), (300, flags::VALUE_FORMAT_U16)];
        let contacts = [
            (0u8, false, false),
            (flags::CONTACT_SUPPORTED, true, false),
            (flags::CONTACT_SUPPORTED | flags::CONTACT_DETECTED, true, true),
        ];
        let energies = [None, Some(1234u16)];
        let rr_sets: [&[u16]; 3] = [&[], &[800], &[800, 812, 1020]];

        for (bpm, width_flag) in widths {
            for (contact_flags, supported, detected) in contacts {
                for energy in energies {
                    for rr in rr_sets {
                        let mut flag_byte = width_flag | contact_flags;
                        let mut payload = Vec::new();
                        if width_flag == 0 {
                            payload.push(bpm as u8);
                        } else {
                            payload.extend_from_slice(&bpm.to_le_bytes());
                        }
                        if let Some(energy) = energy {
                            flag_byte |= flags::ENERGY_EXPENDED;
                            payload.extend_from_slice(&energy.to_le_bytes());
                        }
                        if !rr.is_empty() {
                            flag_byte |= flags::RR_INTERVALS;
                            for value in rr {
                                payload.extend_from_slice(&value.to_le_bytes());
                            }
                        }
                        payload.insert(0, flag_byte);

                        let case = format!("payload {:02X?}", payload);
                        let decoded = parse_measurement(&payload).expect(&case);
                        assert_eq!(decoded.beats_per_minute, bpm, "{}", case);
                        assert_eq!(decoded.sensor_contact_supported, supported, "{}", case);
                        assert_eq!(decoded.sensor_contact_detected, detected, "{}", case);
                        assert_eq!(decoded.energy_expended, energy, "{}", case);
                        assert_eq!(decoded.rr_intervals, rr, "{}", case);

                        assert_eq!(encode_measurement(&decoded), payload, "{}", case);
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_device_strings() {
        assert_eq!(parse_battery_level(&[87]), Some(87));
        assert_eq!(parse_battery_level(&[]), None);
        assert_eq!(
            parse_string_characteristic(b"Polar H10\0"),
            Some("Polar H10".to_string())
        );
        assert_eq!(parse_string_characteristic(b"  "), None);
    }
}
