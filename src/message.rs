//! Queue message wire format and the typed mutation variants.
//!
//! A message travels the queue as `{type, meta, occurredAt}`. The
//! serialized bytes double as the message's identity: the exact string
//! stored in the processing list is the handle used to confirm it.
//!
//! `meta` stays an open JSON object on the wire; [`Message::mutation`]
//! narrows it into a [`Mutation`] variant. Types this crate does not
//! recognize come back as [`Mutation::Unknown`] so the processor can
//! skip them without failing the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CodecError;

pub const WRITE_SIMPLE_VALUE: &str = "WRITE_SIMPLE_VALUE";
pub const WRITE_STATE_OBJECT: &str = "WRITE_STATE_OBJECT";
pub const WRITE_HASHMAP_VALUE: &str = "WRITE_HASHMAP_VALUE";
pub const ADD_STRINGS_TO_SET: &str = "ADD_STRINGS_TO_SET";
pub const REMOVE_STRINGS_FROM_SET: &str = "REMOVE_STRINGS_FROM_SET";

/// A queue message as it is serialized onto the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub meta: Value,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

/// A typed view of a message's `type` + `meta`.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Store an already-serialized value under a simple key.
    WriteSimpleValue { key: String, value: String },
    /// Versioned state write; `value` is the serialized new state.
    WriteStateObject { key: String, value: String },
    /// Single-field hash write. `None` deletes the field.
    WriteHashmapValue {
        key: String,
        field: String,
        value: Option<String>,
    },
    AddStringsToSet { key: String, values: Vec<String> },
    RemoveStringsFromSet { key: String, values: Vec<String> },
    /// Forward-compatible fallback for unrecognized message types.
    Unknown { kind: String },
}

#[derive(Serialize, Deserialize)]
struct ValueMeta {
    key: String,
    value: String,
}

#[derive(Serialize, Deserialize)]
struct HashmapMeta {
    key: String,
    field: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SetMeta {
    key: String,
    values: Vec<String>,
}

impl Message {
    /// Build a message for a mutation, stamped with the current time.
    pub fn new(mutation: Mutation) -> Result<Self, CodecError> {
        Self::with_occurred_at(mutation, Utc::now())
    }

    /// Build a message with an explicit `occurredAt` timestamp.
    pub fn with_occurred_at(
        mutation: Mutation,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, CodecError> {
        let (kind, meta) = mutation.into_wire_parts()?;
        Ok(Message {
            kind,
            meta,
            occurred_at,
        })
    }

    /// Narrow `type` + `meta` into a typed [`Mutation`].
    ///
    /// Unrecognized types yield [`Mutation::Unknown`]; a recognized type
    /// whose `meta` does not match its expected shape is an error.
    pub fn mutation(&self) -> Result<Mutation, CodecError> {
        let meta = self.meta.clone();
        let mutation = match self.kind.as_str() {
            WRITE_SIMPLE_VALUE => {
                let m: ValueMeta = from_meta(meta)?;
                Mutation::WriteSimpleValue {
                    key: m.key,
                    value: m.value,
                }
            }
            WRITE_STATE_OBJECT => {
                let m: ValueMeta = from_meta(meta)?;
                Mutation::WriteStateObject {
                    key: m.key,
                    value: m.value,
                }
            }
            WRITE_HASHMAP_VALUE => {
                let m: HashmapMeta = from_meta(meta)?;
                Mutation::WriteHashmapValue {
                    key: m.key,
                    field: m.field,
                    value: m.value,
                }
            }
            ADD_STRINGS_TO_SET => {
                let m: SetMeta = from_meta(meta)?;
                Mutation::AddStringsToSet {
                    key: m.key,
                    values: m.values,
                }
            }
            REMOVE_STRINGS_FROM_SET => {
                let m: SetMeta = from_meta(meta)?;
                Mutation::RemoveStringsFromSet {
                    key: m.key,
                    values: m.values,
                }
            }
            other => Mutation::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(mutation)
    }
}

impl Mutation {
    fn into_wire_parts(self) -> Result<(String, Value), CodecError> {
        let (kind, meta) = match self {
            Mutation::WriteSimpleValue { key, value } => {
                (WRITE_SIMPLE_VALUE, to_meta(&ValueMeta { key, value })?)
            }
            Mutation::WriteStateObject { key, value } => {
                (WRITE_STATE_OBJECT, to_meta(&ValueMeta { key, value })?)
            }
            Mutation::WriteHashmapValue { key, field, value } => (
                WRITE_HASHMAP_VALUE,
                to_meta(&HashmapMeta { key, field, value })?,
            ),
            Mutation::AddStringsToSet { key, values } => {
                (ADD_STRINGS_TO_SET, to_meta(&SetMeta { key, values })?)
            }
            Mutation::RemoveStringsFromSet { key, values } => {
                (REMOVE_STRINGS_FROM_SET, to_meta(&SetMeta { key, values })?)
            }
            Mutation::Unknown { kind } => {
                return Ok((kind, Value::Object(serde_json::Map::new())))
            }
        };
        Ok((kind.to_string(), meta))
    }
}

fn to_meta<T: Serialize>(meta: &T) -> Result<Value, CodecError> {
    serde_json::to_value(meta).map_err(|e| CodecError::new("encoding message meta", e))
}

fn from_meta<T: serde::de::DeserializeOwned>(meta: Value) -> Result<T, CodecError> {
    serde_json::from_value(meta).map_err(|e| CodecError::new("decoding message meta", e))
}

/// A popped message paired with its confirmation handle.
///
/// The handle is the exact serialized string occupying the processing
/// list; it must be passed back verbatim to confirm the message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageWithHandle {
    message: Message,
    handle: String,
}

impl MessageWithHandle {
    pub(crate) fn new(message: Message, handle: String) -> Self {
        MessageWithHandle { message, handle }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn into_parts(self) -> (Message, String) {
        (self.message, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn wire_shape_matches_contract() {
        let message = Message::with_occurred_at(
            Mutation::WriteSimpleValue {
                key: "k".into(),
                value: "\"v\"".into(),
            },
            fixed_time(),
        )
        .unwrap();

        let wire: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "WRITE_SIMPLE_VALUE",
                "meta": {"key": "k", "value": "\"v\""},
                "occurredAt": "2024-01-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn mutation_round_trips_every_kind() {
        let mutations = vec![
            Mutation::WriteSimpleValue {
                key: "a".into(),
                value: "1".into(),
            },
            Mutation::WriteStateObject {
                key: "b".into(),
                value: "{\"x\":1}".into(),
            },
            Mutation::WriteHashmapValue {
                key: "c".into(),
                field: "f".into(),
                value: Some("2".into()),
            },
            Mutation::AddStringsToSet {
                key: "d".into(),
                values: vec!["x".into(), "y".into()],
            },
            Mutation::RemoveStringsFromSet {
                key: "e".into(),
                values: vec!["x".into()],
            },
        ];

        for mutation in mutations {
            let message = Message::with_occurred_at(mutation.clone(), fixed_time()).unwrap();
            let raw = serde_json::to_string(&message).unwrap();
            let decoded: Message = serde_json::from_str(&raw).unwrap();
            assert_eq!(decoded.mutation().unwrap(), mutation);
        }
    }

    #[test]
    fn null_hashmap_value_decodes_as_none() {
        let raw = r#"{"type":"WRITE_HASHMAP_VALUE","meta":{"key":"k","field":"f","value":null},"occurredAt":"2024-01-01T00:00:00Z"}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message.mutation().unwrap(),
            Mutation::WriteHashmapValue {
                key: "k".into(),
                field: "f".into(),
                value: None,
            }
        );
    }

    #[test]
    fn absent_hashmap_value_decodes_as_none() {
        let raw = r#"{"type":"WRITE_HASHMAP_VALUE","meta":{"key":"k","field":"f"},"occurredAt":"2024-01-01T00:00:00Z"}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        match message.mutation().unwrap() {
            Mutation::WriteHashmapValue { value, .. } => assert_eq!(value, None),
            other => panic!("unexpected mutation: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_type_becomes_unknown() {
        let raw = r#"{"type":"COMPACT_EVERYTHING","meta":{"whatever":1},"occurredAt":"2024-01-01T00:00:00Z"}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message.mutation().unwrap(),
            Mutation::Unknown {
                kind: "COMPACT_EVERYTHING".into(),
            }
        );
    }

    #[test]
    fn malformed_meta_for_known_type_is_an_error() {
        let raw = r#"{"type":"WRITE_SIMPLE_VALUE","meta":{"key":"k"},"occurredAt":"2024-01-01T00:00:00Z"}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert!(message.mutation().is_err());
    }
}
