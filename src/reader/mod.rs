//! Read-side API: snapshot getters plus the live state subscriber.
//!
//! Readers go straight to the backend; only writes are serialized
//! through the queue and processor.

mod error;
mod subscriber;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub use error::{ReadError, SubscribeError};
pub use subscriber::StateSubscription;

use crate::backend::Backend;
use crate::codec;
use crate::keys;
use crate::state::{DiffMessage, StateVersion};

/// Snapshot reader over one namespace.
#[derive(Clone)]
pub struct StateReader {
    backend: Arc<dyn Backend>,
    namespace: String,
}

impl StateReader {
    pub fn new(backend: Arc<dyn Backend>, namespace: impl Into<String>) -> Self {
        StateReader {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Current simple value under a key, decoded.
    pub fn simple_value(&self, key: &str) -> Result<Option<Value>, ReadError> {
        self.backend
            .get(&keys::simple_value(&self.namespace, key))?
            .map(|raw| codec::decode_value(&raw))
            .transpose()
            .map_err(Into::into)
    }

    /// Current versioned state record under a key.
    pub fn state(&self, key: &str) -> Result<Option<StateVersion>, ReadError> {
        self.backend
            .get(&keys::state(&self.namespace, key))?
            .map(|raw| codec::decode::<StateVersion>(&raw))
            .transpose()
            .map_err(Into::into)
    }

    /// One field of a hashmap, decoded.
    pub fn hashmap_value(&self, key: &str, field: &str) -> Result<Option<Value>, ReadError> {
        self.backend
            .hget(&keys::hashmap(&self.namespace, key), field)?
            .map(|raw| codec::decode_value(&raw))
            .transpose()
            .map_err(Into::into)
    }

    /// All fields of a hashmap, decoded.
    pub fn hashmap_entries(&self, key: &str) -> Result<HashMap<String, Value>, ReadError> {
        let raw = self.backend.hgetall(&keys::hashmap(&self.namespace, key))?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            entries.insert(field, codec::decode_value(&value)?);
        }
        Ok(entries)
    }

    /// Number of fields in a hashmap.
    pub fn hashmap_len(&self, key: &str) -> Result<u64, ReadError> {
        Ok(self.backend.hlen(&keys::hashmap(&self.namespace, key))?)
    }

    /// All values of a hashmap, decoded, in unspecified order.
    pub fn hashmap_values(&self, key: &str) -> Result<Vec<Value>, ReadError> {
        self.backend
            .hvals(&keys::hashmap(&self.namespace, key))?
            .iter()
            .map(|raw| codec::decode_value(raw).map_err(Into::into))
            .collect()
    }

    /// Members of a string set.
    pub fn set_members(&self, key: &str) -> Result<Vec<String>, ReadError> {
        Ok(self
            .backend
            .smembers(&keys::string_set(&self.namespace, key))?)
    }

    /// Fetch the current state of `key` and join its delta stream.
    ///
    /// `on_full` fires with the snapshot (and again after every
    /// reconnection), then `on_delta` fires once per version in order.
    /// The returned handle unsubscribes; the terminal condition is
    /// delivered once through `on_error`.
    pub fn fetch_state_and_listen<F, D, E>(
        &self,
        key: &str,
        on_full: F,
        on_delta: D,
        on_error: E,
    ) -> StateSubscription
    where
        F: Fn(StateVersion) + Send + 'static,
        D: Fn(DiffMessage) + Send + 'static,
        E: Fn(SubscribeError) + Send + 'static,
    {
        subscriber::spawn(
            Arc::clone(&self.backend),
            &self.namespace,
            key,
            on_full,
            on_delta,
            on_error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn reader() -> (StateReader, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (StateReader::new(backend.clone(), "ns"), backend)
    }

    #[test]
    fn simple_value_roundtrip() {
        let (reader, backend) = reader();
        assert!(reader.simple_value("k").unwrap().is_none());

        backend.set("ns-VAL-k", "{\"a\":1}").unwrap();
        assert_eq!(reader.simple_value("k").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn state_record_roundtrip() {
        let (reader, backend) = reader();
        backend
            .set(
                "ns-STATE-k",
                r#"{"version":3,"writtenAt":"2024-01-01T00:00:00Z","value":{"stage":3}}"#,
            )
            .unwrap();

        let record = reader.state("k").unwrap().expect("state missing");
        assert_eq!(record.version, 3);
        assert_eq!(record.value, json!({"stage": 3}));
    }

    #[test]
    fn corrupt_state_record_is_an_error() {
        let (reader, backend) = reader();
        backend.set("ns-STATE-k", "not json").unwrap();
        assert!(matches!(reader.state("k"), Err(ReadError::Codec(_))));
    }

    #[test]
    fn hashmap_getters() {
        let (reader, backend) = reader();
        backend.hset("ns-MAP-k", "f1", "1").unwrap();
        backend.hset("ns-MAP-k", "f2", "\"two\"").unwrap();

        assert_eq!(reader.hashmap_value("k", "f1").unwrap(), Some(json!(1)));
        assert_eq!(reader.hashmap_value("k", "nope").unwrap(), None);
        assert_eq!(reader.hashmap_len("k").unwrap(), 2);

        let entries = reader.hashmap_entries("k").unwrap();
        assert_eq!(entries["f1"], json!(1));
        assert_eq!(entries["f2"], json!("two"));

        let mut values = reader.hashmap_values("k").unwrap();
        values.sort_by_key(|v| v.to_string());
        assert_eq!(values, vec![json!(1), json!("two")]);
    }

    #[test]
    fn set_members_read() {
        let (reader, backend) = reader();
        backend
            .sadd("ns-SET-k", &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(
            reader.set_members("k").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
