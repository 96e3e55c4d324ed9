//! Structural diff between two JSON-like values.
//!
//! The payload format is private to this implementation but stable:
//! the same inputs always serialize to the same bytes (object keys are
//! sorted by the underlying map). Consumers on the other side of a
//! delta channel recognize it via [`apply_structural_diff`].
//!
//! Shape, per key inside an object delta:
//!
//! - `[new]` — key added
//! - `[old, new]` — value replaced (also the whole-document delta when
//!   either side is not an object)
//! - `[old, 0, 0]` — key removed
//! - `{ ... }` — nested object delta
//!
//! Arrays are treated as atomic values and replaced wholesale. An
//! unchanged value produces no delta at all (`None`).

use std::error::Error;
use std::fmt;

use serde_json::{json, Map, Value};

/// Compute the delta that transforms `a` into `b`.
///
/// Returns `None` when the values are equal.
pub fn structural_diff(a: &Value, b: &Value) -> Option<Value> {
    if a == b {
        return None;
    }

    match (a, b) {
        (Value::Object(old), Value::Object(new)) => {
            let mut delta = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    Some(new_value) => {
                        if let Some(child) = structural_diff(old_value, new_value) {
                            delta.insert(key.clone(), child);
                        }
                    }
                    None => {
                        delta.insert(key.clone(), json!([old_value, 0, 0]));
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    delta.insert(key.clone(), json!([new_value]));
                }
            }
            Some(Value::Object(delta))
        }
        _ => Some(json!([a, b])),
    }
}

/// Error raised when a delta does not fit the value it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// The delta payload does not match the expected shape.
    Malformed(String),
    /// The delta names a key the base value does not have.
    MissingKey(String),
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::Malformed(detail) => write!(f, "malformed delta payload: {}", detail),
            DiffError::MissingKey(key) => {
                write!(f, "delta targets missing key '{}'", key)
            }
        }
    }
}

impl Error for DiffError {}

/// Apply a delta produced by [`structural_diff`] to a base value.
///
/// `apply_structural_diff(a, structural_diff(a, b)) == b` for all
/// JSON values `a` and `b`.
pub fn apply_structural_diff(base: &Value, delta: &Value) -> Result<Value, DiffError> {
    match delta {
        Value::Null => Ok(base.clone()),
        Value::Array(pair) if pair.len() == 2 => Ok(pair[1].clone()),
        Value::Object(entries) => {
            let mut result = match base {
                Value::Object(map) => map.clone(),
                other => {
                    return Err(DiffError::Malformed(format!(
                        "object delta applied to non-object base {}",
                        other
                    )))
                }
            };

            for (key, entry) in entries {
                match entry {
                    Value::Array(marker) => match marker.len() {
                        1 => {
                            result.insert(key.clone(), marker[0].clone());
                        }
                        2 => {
                            result.insert(key.clone(), marker[1].clone());
                        }
                        3 => {
                            result.remove(key);
                        }
                        n => {
                            return Err(DiffError::Malformed(format!(
                                "marker of length {} under key '{}'",
                                n, key
                            )))
                        }
                    },
                    Value::Object(_) => {
                        let child = result
                            .get(key)
                            .cloned()
                            .ok_or_else(|| DiffError::MissingKey(key.clone()))?;
                        result.insert(key.clone(), apply_structural_diff(&child, entry)?);
                    }
                    other => {
                        return Err(DiffError::Malformed(format!(
                            "unexpected entry {} under key '{}'",
                            other, key
                        )))
                    }
                }
            }
            Ok(Value::Object(result))
        }
        other => Err(DiffError::Malformed(format!(
            "delta must be null, a pair, or an object, got {}",
            other
        ))),
    }
}
