//! Key construction for every key space of the store.
//!
//! All keys live under a caller-supplied namespace prefix. The exact
//! strings are part of the persisted-state compatibility contract, so
//! they are centralized here and covered by tests.

/// Singleton-processor lock key for a namespace.
pub fn processor_lock(namespace: &str) -> String {
    format!("STORAGE_PROCESSOR_{}", namespace)
}

/// Main list of a reliable queue.
pub fn queue(namespace: &str, queue_id: &str) -> String {
    format!("{}-Q-{}", namespace, queue_id)
}

/// Processing list (in-flight messages) of a reliable queue.
pub fn queue_processing(namespace: &str, queue_id: &str) -> String {
    format!("{}-QP-{}", namespace, queue_id)
}

/// Wake-up pub/sub channel of a reliable queue.
pub fn queue_channel(namespace: &str, queue_id: &str) -> String {
    format!("{}-Q-{}-CHANNEL", namespace, queue_id)
}

/// Simple (unversioned) value key.
pub fn simple_value(namespace: &str, key: &str) -> String {
    format!("{}-VAL-{}", namespace, key)
}

/// Versioned state object key.
pub fn state(namespace: &str, key: &str) -> String {
    format!("{}-STATE-{}", namespace, key)
}

/// Per-key delta pub/sub channel of a versioned state object.
pub fn state_delta_channel(namespace: &str, key: &str) -> String {
    format!("{}-STATE-{}-DELTA", namespace, key)
}

/// Hashmap key.
pub fn hashmap(namespace: &str, key: &str) -> String {
    format!("{}-MAP-{}", namespace, key)
}

/// String-set key.
pub fn string_set(namespace: &str, key: &str) -> String {
    format!("{}-SET-{}", namespace, key)
}

/// Payload published on the queue wake-up channel.
pub const PUSH_PAYLOAD: &str = "PUSH";
