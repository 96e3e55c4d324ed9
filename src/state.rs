//! Versioned state records and the delta messages published for them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CodecError;

/// A persisted snapshot of a versioned state object.
///
/// Versions start at 1 and increase by exactly one per successful
/// write; deleting the object (writing `{}`) resets the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    pub version: u64,
    #[serde(rename = "writtenAt")]
    pub written_at: DateTime<Utc>,
    pub value: Value,
}

impl StateVersion {
    /// Decode the stored value into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| CodecError::new("decoding state value", e))
    }
}

/// The structural delta published after each versioned write.
///
/// `to_version` is always `from_version + 1`; subscribers use the pair
/// to gate deltas against the snapshot they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffMessage {
    #[serde(rename = "fromVersion")]
    pub from_version: u64,
    #[serde(rename = "toVersion")]
    pub to_version: u64,
    #[serde(rename = "writtenAt")]
    pub written_at: DateTime<Utc>,
    #[serde(rename = "deltaPayload")]
    pub delta_payload: Value,
}
