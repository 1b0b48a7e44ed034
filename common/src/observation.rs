use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One object reported by the detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Detector output for one frame, as served over HTTP (one JSON object per
/// frame, newline-delimited when streamed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// The set of labels visible at one observation tick.
///
/// Binary wire format (Kafka payload, big-endian):
///
///   [0]      version = 0x01
///   [1..9]   captured_at_ms  (i64, Unix millis)
///   [9..17]  seq             (u64, sequence number)
///   [17..19] label_count     (u16)
///   then label_count times:
///     [2 bytes] label_len    (u16)
///     [label_len bytes] UTF-8 label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub labels: BTreeSet<String>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

const HEADER_SIZE: usize = 19; // 1 version + 8 ts + 8 seq + 2 label_count
const VERSION: u8 = 0x01;

impl Observation {
    pub fn new(labels: BTreeSet<String>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            labels,
            captured_at_ms,
            seq,
        }
    }

    /// Build an observation from raw detector output, keeping only
    /// detections at or above `min_confidence`. Duplicate labels collapse.
    pub fn from_detections(
        frame: &DetectionFrame,
        min_confidence: f32,
        captured_at_ms: i64,
        seq: u64,
    ) -> Self {
        let labels = frame
            .detections
            .iter()
            .filter(|d| d.confidence >= min_confidence)
            .map(|d| d.label.trim())
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(labels, captured_at_ms, seq)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Serialize to binary format for Kafka payload.
    ///
    /// Labels longer than `u16::MAX` bytes are truncated at a char boundary;
    /// detector class names are nowhere near that.
    pub fn serialize(&self) -> Vec<u8> {
        let body: usize = self.labels.iter().map(|l| 2 + l.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_SIZE + body);
        buf.push(VERSION);
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        let count = self.labels.len().min(u16::MAX as usize);
        buf.extend_from_slice(&(count as u16).to_be_bytes());
        for label in self.labels.iter().take(count) {
            let bytes = truncate_utf8(label, u16::MAX as usize).as_bytes();
            buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        buf
    }

    /// Deserialize from binary Kafka payload.
    pub fn deserialize(data: &[u8]) -> Result<Self, ObservationError> {
        if data.len() < HEADER_SIZE {
            return Err(ObservationError::TooShort {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }
        if data[0] != VERSION {
            return Err(ObservationError::UnknownVersion(data[0]));
        }

        let captured_at_ms = i64::from_be_bytes(read_array(data, 1)?);
        let seq = u64::from_be_bytes(read_array(data, 9)?);
        let count = u16::from_be_bytes(read_array(data, 17)?) as usize;

        let mut labels = BTreeSet::new();
        let mut pos = HEADER_SIZE;
        for _ in 0..count {
            let len = u16::from_be_bytes(read_array(data, pos)?) as usize;
            pos += 2;
            let end = pos + len;
            let raw = data.get(pos..end).ok_or(ObservationError::TooShort {
                got: data.len(),
                expected: end,
            })?;
            let label =
                std::str::from_utf8(raw).map_err(|_| ObservationError::InvalidUtf8 { offset: pos })?;
            labels.insert(label.to_string());
            pos = end;
        }

        Ok(Self {
            labels,
            captured_at_ms,
            seq,
        })
    }
}

fn read_array<const N: usize>(data: &[u8], at: usize) -> Result<[u8; N], ObservationError> {
    data.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(ObservationError::TooShort {
            got: data.len(),
            expected: at + N,
        })
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    #[error("observation payload too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("unknown observation payload version {0:#04x}")]
    UnknownVersion(u8),
    #[error("label at byte {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn roundtrip() {
        let obs = Observation::new(labels(&["nivea", "Moong Dal"]), 1708300000000, 42);
        let bytes = obs.serialize();
        assert_eq!(bytes[0], VERSION);
        let decoded = Observation::deserialize(&bytes).unwrap();
        assert_eq!(decoded, obs);
    }

    #[test]
    fn empty_label_set_is_valid() {
        let obs = Observation::new(BTreeSet::new(), 1000, 1);
        let bytes = obs.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let decoded = Observation::deserialize(&bytes).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.seq, 1);
    }

    #[test]
    fn deserialize_too_short() {
        let result = Observation::deserialize(&[VERSION; 10]);
        assert!(matches!(result, Err(ObservationError::TooShort { .. })));
    }

    #[test]
    fn deserialize_truncated_label() {
        let obs = Observation::new(labels(&["parachute hair oil"]), 1000, 1);
        let mut bytes = obs.serialize();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            Observation::deserialize(&bytes),
            Err(ObservationError::TooShort { .. })
        ));
    }

    #[test]
    fn deserialize_unknown_version() {
        let mut bytes = Observation::new(BTreeSet::new(), 0, 0).serialize();
        bytes[0] = 0x7f;
        assert!(matches!(
            Observation::deserialize(&bytes),
            Err(ObservationError::UnknownVersion(0x7f))
        ));
    }

    #[test]
    fn deserialize_rejects_invalid_utf8() {
        let mut bytes = Observation::new(labels(&["ab"]), 0, 0).serialize();
        let last = bytes.len() - 1;
        bytes[last] = 0xff;
        assert!(matches!(
            Observation::deserialize(&bytes),
            Err(ObservationError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn from_detections_filters_low_confidence_and_dedups() {
        let frame: DetectionFrame = serde_json::from_str(
            r#"{"detections": [
                {"label": "nivea", "confidence": 0.91},
                {"label": "nivea", "confidence": 0.75},
                {"label": "apple", "confidence": 0.30},
                {"label": "  Blue bottle ", "confidence": 0.5},
                {"label": "", "confidence": 0.99}
            ]}"#,
        )
        .unwrap();
        let obs = Observation::from_detections(&frame, 0.5, 1000, 3);
        assert_eq!(obs.labels, labels(&["Blue bottle", "nivea"]));
        assert_eq!(obs.captured_at_ms, 1000);
    }

    #[test]
    fn detection_confidence_defaults_to_one() {
        let frame: DetectionFrame =
            serde_json::from_str(r#"{"detections": [{"label": "nivea"}]}"#).unwrap();
        assert_eq!(frame.detections[0].confidence, 1.0);
        let empty: DetectionFrame = serde_json::from_str("{}").unwrap();
        assert!(empty.detections.is_empty());
    }
}
