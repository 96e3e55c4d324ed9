//! Producer façade: thin enqueuers for the recognized mutations.
//!
//! Writers never touch storage keys directly; every call serializes
//! its value, wraps it in a [`Message`] stamped with the current time,
//! and pushes it onto the incoming queue for the processor to apply.

use serde::Serialize;
use serde_json::json;

use crate::codec;
use crate::message::{Message, Mutation};
use crate::queue::{QueueError, ReliableQueue};

/// Enqueues mutations for one namespace and queue.
#[derive(Clone)]
pub struct StateWriter {
    queue: ReliableQueue,
    queue_id: String,
}

impl StateWriter {
    pub fn new(queue: ReliableQueue, queue_id: impl Into<String>) -> Self {
        StateWriter {
            queue,
            queue_id: queue_id.into(),
        }
    }

    /// Store a value under a simple key.
    pub fn write_simple_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<u64, QueueError> {
        self.enqueue(Mutation::WriteSimpleValue {
            key: key.to_string(),
            value: codec::encode(value)?,
        })
    }

    /// Write the next version of a state object.
    pub fn write_state_object<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<u64, QueueError> {
        self.enqueue(Mutation::WriteStateObject {
            key: key.to_string(),
            value: codec::encode(value)?,
        })
    }

    /// Delete a state object by writing the empty object.
    pub fn delete_state_object(&self, key: &str) -> Result<u64, QueueError> {
        self.write_state_object(key, &json!({}))
    }

    /// Write one hashmap field; `None` deletes the field.
    pub fn write_hashmap_value<T: Serialize>(
        &self,
        key: &str,
        field: &str,
        value: Option<&T>,
    ) -> Result<u64, QueueError> {
        let value = value.map(codec::encode).transpose()?;
        self.enqueue(Mutation::WriteHashmapValue {
            key: key.to_string(),
            field: field.to_string(),
            value,
        })
    }

    /// Add members to a string set.
    pub fn add_to_string_set(&self, key: &str, values: &[String]) -> Result<u64, QueueError> {
        self.enqueue(Mutation::AddStringsToSet {
            key: key.to_string(),
            values: values.to_vec(),
        })
    }

    /// Remove members from a string set.
    pub fn remove_from_string_set(
        &self,
        key: &str,
        values: &[String],
    ) -> Result<u64, QueueError> {
        self.enqueue(Mutation::RemoveStringsFromSet {
            key: key.to_string(),
            values: values.to_vec(),
        })
    }

    fn enqueue(&self, mutation: Mutation) -> Result<u64, QueueError> {
        let message = Message::new(mutation)?;
        self.queue.push(&self.queue_id, &message)
    }
}
