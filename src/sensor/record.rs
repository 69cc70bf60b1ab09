//! Sensor record wire format
//!
//! Compact JSON, one object per report:
//! `{"node_id":"Leaf_01","role":"leaf","temp":24,"humi":55,"light_v":1.23,"light_raw":400,"motion":1}`.
//! When a record cannot be encoded within [`MAX_PAYLOAD_LEN`] the fixed
//! [`ERROR_MARKER`] goes out instead, so every cycle still sends something.

use super::instruments::Sample;
use crate::error::{NodeError, NodeResult};
use crate::mesh::{NodeType, MAX_PAYLOAD_LEN};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payload sent when a record cannot be encoded
pub const ERROR_MARKER: &[u8] = br#"{"err":"json"}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub node_id: String,
    pub role: String,
    pub temp: i32,
    pub humi: i32,
    pub light_v: f64,
    pub light_raw: u16,
    /// 0 or 1
    pub motion: u8,
}

impl SensorRecord {
    pub fn from_sample(node_id: &str, role: NodeType, sample: &Sample) -> Self {
        Self {
            node_id: node_id.to_string(),
            role: role.as_str().to_string(),
            temp: sample.temp_c,
            humi: sample.humidity,
            light_v: sample.light_volts(),
            light_raw: sample.light_raw,
            motion: u8::from(sample.motion),
        }
    }

    /// Strict encoding; fails if the result would not fit one unicast
    pub fn encode(&self) -> NodeResult<Bytes> {
        let json = serde_json::to_vec(self).map_err(|e| NodeError::serialization(e.to_string()))?;
        if json.len() > MAX_PAYLOAD_LEN {
            return Err(NodeError::serialization(format!(
                "encoded record is {} bytes, limit is {}",
                json.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(Bytes::from(json))
    }

    /// Encoding that always produces a sendable payload
    pub fn encode_bounded(&self) -> Encoded {
        match self.encode() {
            Ok(bytes) => Encoded {
                bytes,
                fallback: None,
            },
            Err(e) => Encoded {
                bytes: Bytes::from_static(ERROR_MARKER),
                fallback: Some(e),
            },
        }
    }
}

/// Output of [`SensorRecord::encode_bounded`]
#[derive(Debug)]
pub struct Encoded {
    pub bytes: Bytes,
    /// Why the error marker was substituted, if it was
    pub fallback: Option<NodeError>,
}

/// Anything a leaf may put on the wire
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReportPayload {
    Record(SensorRecord),
    ErrorMarker { err: String },
}

impl ReportPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_record() -> SensorRecord {
        SensorRecord {
            node_id: "Leaf_01".to_string(),
            role: "leaf".to_string(),
            temp: 24,
            humi: 55,
            light_v: 1.23,
            light_raw: 400,
            motion: 1,
        }
    }

    #[test]
    fn test_decoded_fields_match() {
        let bytes = sample_record().encode().unwrap();
        match ReportPayload::decode(&bytes).unwrap() {
            ReportPayload::Record(decoded) => assert_eq!(decoded, sample_record()),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let bytes = sample_record().encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["node_id"], "Leaf_01");
        assert_eq!(value["role"], "leaf");
        assert_eq!(value["temp"], 24);
        assert_eq!(value["humi"], 55);
        assert_eq!(value["light_v"], 1.23);
        assert_eq!(value["light_raw"], 400);
        assert_eq!(value["motion"], 1);
        assert!(!String::from_utf8_lossy(&bytes).contains(' '));
    }

    #[test]
    fn test_from_sample() {
        let sample = Sample {
            temp_c: 21,
            humidity: 40,
            motion: false,
            light_raw: 4095,
        };
        let record = SensorRecord::from_sample("Leaf_02", NodeType::Leaf, &sample);
        assert_eq!(record.role, "leaf");
        assert_eq!(record.motion, 0);
        assert!((record.light_v - 3.3).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_record_falls_back_to_marker() {
        let record = SensorRecord {
            node_id: "x".repeat(300),
            ..sample_record()
        };
        assert!(record.encode().is_err());

        let encoded = record.encode_bounded();
        assert_eq!(&encoded.bytes[..], ERROR_MARKER);
        assert!(matches!(
            encoded.fallback,
            Some(NodeError::SerializationFailure { .. })
        ));
        assert_eq!(
            ReportPayload::decode(&encoded.bytes).unwrap(),
            ReportPayload::ErrorMarker {
                err: "json".to_string()
            }
        );
    }

    proptest! {
        #[test]
        fn encoding_never_exceeds_cap(
            node_id in "[a-zA-Z0-9._-]{1,300}",
            temp in any::<i32>(),
            humi in any::<i32>(),
            raw in 0u16..=4095,
            motion in any::<bool>(),
        ) {
            let sample = Sample { temp_c: temp, humidity: humi, motion, light_raw: raw };
            let encoded = SensorRecord::from_sample(&node_id, NodeType::Leaf, &sample).encode_bounded();
            prop_assert!(encoded.bytes.len() <= MAX_PAYLOAD_LEN);
        }
    }
}
