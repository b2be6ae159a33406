use serde::{Deserialize, Serialize};

/// One published humidity sample. Built fresh for every publish cycle,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    pub id: String,
    pub humidity: f32,
    /// Unix epoch milliseconds, valid only after clock synchronization.
    pub timestamp: u64,
}

impl TelemetrySample {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serializes_with_wire_field_names() {
        let sample = TelemetrySample {
            id: "A407031E229A".to_string(),
            humidity: 42.5,
            timestamp: 1_754_000_000_123,
        };

        let json: serde_json::Value =
            serde_json::from_slice(&sample.to_json().unwrap()).unwrap();
        assert_eq!(json["id"], "A407031E229A");
        assert_eq!(json["humidity"], 42.5);
        assert_eq!(json["timestamp"], 1_754_000_000_123_u64);
    }

    #[test]
    fn round_trips() {
        let sample = TelemetrySample {
            id: "00010A0B00FF".to_string(),
            humidity: 0.0,
            timestamp: 0,
        };
        let parsed: TelemetrySample =
            serde_json::from_slice(&sample.to_json().unwrap()).unwrap();
        assert_eq!(parsed, sample);
    }
}
