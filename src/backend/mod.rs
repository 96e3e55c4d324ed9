//! Backend client abstraction over the Redis-style command set.
//!
//! Components in this crate hold an `Arc<dyn Backend>` and never talk
//! to a concrete client directly. Two implementations ship:
//!
//! - [`MemoryBackend`] — in-process, full command semantics including
//!   TTL expiry and pub/sub fan-out; the default for tests and
//!   single-process use.
//! - [`RedisBackend`] — a real connection with auto-reconnect and a
//!   bounded per-command retry policy.
//!
//! Pub/sub requires a connection of its own (a subscribed connection
//! cannot multiplex other commands), so [`Backend::subscribe`] hands
//! out a [`Subscription`] that owns a duplicated connection for its
//! whole lifetime and releases it on drop.

mod error;
mod memory;
mod redis;

use std::collections::HashMap;
use std::time::Duration;

pub use error::BackendError;
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Which end of a list a move operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Left,
    Right,
}

/// Callback invoked whenever the backend (re)establishes its connection.
pub type ReadyListener = Box<dyn Fn() + Send + Sync>;

/// The Redis-style command set used by the store.
///
/// Commands are not buffered while disconnected; they fail fast or
/// retry within the implementation's bounded policy.
pub trait Backend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;
    /// `SETEX`: set with a time-to-live in seconds.
    fn set_ex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<(), BackendError>;
    fn del(&self, key: &str) -> Result<(), BackendError>;

    /// `LPUSH`: prepend, returning the new list length.
    fn lpush(&self, key: &str, value: &str) -> Result<u64, BackendError>;
    fn llen(&self, key: &str) -> Result<u64, BackendError>;
    /// `LMOVE`: atomically move one element between lists.
    fn lmove(
        &self,
        source: &str,
        destination: &str,
        from: ListEnd,
        to: ListEnd,
    ) -> Result<Option<String>, BackendError>;
    /// `LREM`: remove up to `count` occurrences, returning how many went.
    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, BackendError>;

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError>;
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, BackendError>;
    fn hlen(&self, key: &str) -> Result<u64, BackendError>;
    fn hvals(&self, key: &str) -> Result<Vec<String>, BackendError>;
    fn hdel(&self, key: &str, field: &str) -> Result<u64, BackendError>;

    /// `SADD`: returns the number of members newly added.
    fn sadd(&self, key: &str, members: &[String]) -> Result<u64, BackendError>;
    /// `SREM`: returns the number of members removed.
    fn srem(&self, key: &str, members: &[String]) -> Result<u64, BackendError>;
    fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError>;

    /// `PUBLISH`: returns the number of receiving subscribers.
    fn publish(&self, channel: &str, payload: &str) -> Result<u64, BackendError>;
    /// Duplicate a connection and subscribe it to `channel`.
    ///
    /// The subscription is live before this returns; a snapshot read
    /// issued afterwards cannot miss a delta published in between.
    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError>;

    /// Whether the backend currently holds a usable connection.
    fn is_connected(&self) -> bool;
    /// Register a listener fired on every (re)connect.
    fn on_ready(&self, listener: ReadyListener);
}

/// A live pub/sub subscription owning its dedicated connection.
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` is a timeout tick; transport failures surface as
    /// errors and end the subscription.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<String>, BackendError>;
}
