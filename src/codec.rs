//! Value codec shared by writers and readers.
//!
//! Values cross the backend as JSON text. Scalars survive verbatim;
//! structured values round-trip through `serde_json::Value`, whose
//! object representation is a sorted map, so re-encoding a decoded
//! value yields byte-identical output. Typed payloads (including
//! `chrono` timestamps) go through serde on both sides, which keeps the
//! codec symmetric between producer and consumer.

use std::error::Error;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Error type for encode/decode failures.
#[derive(Debug)]
pub struct CodecError {
    context: &'static str,
    source: serde_json::Error,
}

impl CodecError {
    pub(crate) fn new(context: &'static str, source: serde_json::Error) -> Self {
        CodecError { context, source }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec failure while {}: {}", self.context, self.source)
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Encode any serializable value to its wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::new("encoding value", e))
}

/// Decode a wire string into a typed value.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::new("decoding value", e))
}

/// Decode a wire string into an untyped JSON value.
pub fn decode_value(raw: &str) -> Result<Value, CodecError> {
    decode(raw)
}

/// Whether a decoded value is the canonical empty object `{}`.
///
/// Writing the empty object to a versioned state key is the deletion
/// signal, so the check lives next to the codec.
pub fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_survive_verbatim() {
        assert_eq!(encode(&json!(42)).unwrap(), "42");
        assert_eq!(encode(&json!("hi")).unwrap(), "\"hi\"");
        assert_eq!(encode(&json!(true)).unwrap(), "true");
        assert_eq!(encode(&json!(null)).unwrap(), "null");
    }

    #[test]
    fn objects_round_trip_byte_stable() {
        let raw = r#"{"a":1,"b":{"c":[1,2,3]}}"#;
        let decoded = decode_value(raw).unwrap();
        assert_eq!(encode(&decoded).unwrap(), raw);

        // Key order is normalized, so a permuted input re-encodes the same.
        let permuted = decode_value(r#"{"b":{"c":[1,2,3]},"a":1}"#).unwrap();
        assert_eq!(encode(&permuted).unwrap(), raw);
    }

    #[test]
    fn typed_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            stage: u32,
            at: chrono::DateTime<chrono::Utc>,
        }

        let payload = Payload {
            stage: 3,
            at: "2024-01-01T00:00:00Z".parse().unwrap(),
        };
        let wire = encode(&payload).unwrap();
        assert_eq!(decode::<Payload>(&wire).unwrap(), payload);
    }

    #[test]
    fn empty_object_detection() {
        assert!(is_empty_object(&json!({})));
        assert!(!is_empty_object(&json!({"a": 1})));
        assert!(!is_empty_object(&json!([])));
        assert!(!is_empty_object(&json!(null)));
    }

    #[test]
    fn decode_failure_reports_context() {
        let err = decode_value("{not json").unwrap_err();
        assert!(err.to_string().contains("decoding value"));
    }
}
