use serde::{Deserialize, Serialize};

use super::{Result, SerialError};

/// A single distance reading reported by the sensor firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub distance_mm: u32,
    /// Device clock, milliseconds since boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

/// Trigger message; the firmware only checks that a line arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRequest {
    pub pretty_please: u8,
}

impl Default for MeasurementRequest {
    fn default() -> Self {
        Self { pretty_please: 1 }
    }
}

impl MeasurementRequest {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Decode a payload fragment into a `Measurement`.
///
/// The payload must be exactly one JSON object, surrounding whitespace aside.
pub fn parse_measurement(payload: &[u8]) -> Result<Measurement> {
    let payload = payload.trim_ascii();
    if payload.first() != Some(&b'{') {
        return Err(SerialError::MalformedPayload(format!(
            "not a JSON object: {}",
            String::from_utf8_lossy(payload)
        )));
    }
    let mut stream = serde_json::Deserializer::from_slice(payload).into_iter::<Measurement>();
    match stream.next() {
        Some(Ok(measurement)) => {
            let rest = payload[stream.byte_offset()..].trim_ascii();
            if !rest.is_empty() {
                return Err(SerialError::MalformedPayload(format!(
                    "trailing data after object: {}",
                    String::from_utf8_lossy(rest)
                )));
            }
            Ok(measurement)
        }
        Some(Err(e)) => Err(SerialError::MalformedPayload(format!(
            "{} ({})",
            String::from_utf8_lossy(payload),
            e
        ))),
        None => Err(SerialError::MalformedPayload("empty object stream".to_string())),
    }
}
