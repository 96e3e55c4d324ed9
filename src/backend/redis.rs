//! Redis-backed implementation of the [`Backend`] trait.
//!
//! One shared connection serves all non-blocking commands; every
//! subscription duplicates its own connection from the client, because
//! a subscribed connection cannot multiplex other commands.
//!
//! Policies:
//!
//! - No offline buffering. A command issued without a connection tries
//!   to reconnect in-line and otherwise counts a failed attempt.
//! - Bounded retries: at most [`MAX_COMMAND_RETRIES`] retries with a
//!   fixed [`COMMAND_RETRY_DELAY`] gap, then the command fails with a
//!   timeout error.
//! - Ready listeners fire after each successful (re)connect, so the
//!   processor can cut its back-off short.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use redis::{Commands, RedisError};
use tracing::{debug, warn};

use super::{Backend, BackendError, ListEnd, ReadyListener, Subscription};

/// Retry bound per command, excluding the first attempt.
pub const MAX_COMMAND_RETRIES: u32 = 10;
/// Gap between command retries.
pub const COMMAND_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How often a blocked subscription reader wakes to check for shutdown.
const SUBSCRIPTION_READ_TICK: Duration = Duration::from_millis(250);
/// How long `subscribe` waits for the SUBSCRIBE round-trip.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisBackend {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    ready_listeners: RwLock<Vec<ReadyListener>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl RedisBackend {
    /// Open a client for `url` (e.g. `redis://127.0.0.1:6379`) and
    /// eagerly establish the shared connection.
    pub fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)
            .map_err(|e| BackendError::Command(format!("invalid backend url: {}", e)))?;
        let connection = client
            .get_connection()
            .map_err(|e| BackendError::Disconnected(e.to_string()))?;
        Ok(RedisBackend {
            client,
            connection: Mutex::new(Some(connection)),
            ready_listeners: RwLock::new(Vec::new()),
            max_retries: MAX_COMMAND_RETRIES,
            retry_delay: COMMAND_RETRY_DELAY,
        })
    }

    /// Override the retry policy (shorter bounds for tests).
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    fn notify_ready(&self) {
        if let Ok(listeners) = self.ready_listeners.read() {
            for listener in listeners.iter() {
                listener();
            }
        }
    }

    /// Run one command under the retry policy.
    ///
    /// Transport failures drop the shared connection and retry after
    /// the fixed delay; anything else (wrong type, server error) is
    /// returned immediately.
    fn run<T>(
        &self,
        command: &'static str,
        op: impl Fn(&mut redis::Connection) -> Result<T, RedisError>,
    ) -> Result<T, BackendError> {
        let mut attempts = 0u32;
        loop {
            let mut newly_connected = false;
            let outcome = {
                let mut guard = self
                    .connection
                    .lock()
                    .map_err(|_| BackendError::LockPoisoned("connection"))?;
                if guard.is_none() {
                    match self.client.get_connection() {
                        Ok(fresh) => {
                            debug!(command, "backend reconnected");
                            *guard = Some(fresh);
                            newly_connected = true;
                        }
                        Err(e) => {
                            warn!(command, error = %e, "backend reconnect failed");
                        }
                    }
                }
                match guard.as_mut() {
                    None => Err(None),
                    Some(connection) => match op(connection) {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            if is_transport_error(&e) {
                                *guard = None;
                            }
                            Err(Some(e))
                        }
                    },
                }
            };

            if newly_connected {
                self.notify_ready();
            }

            match outcome {
                Ok(value) => return Ok(value),
                Err(Some(e)) if !is_transport_error(&e) => {
                    return Err(BackendError::Command(e.to_string()));
                }
                Err(_) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(BackendError::Timeout {
                            command: command.to_string(),
                            attempts,
                        });
                    }
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

impl Backend for RedisBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.run("GET", |c| c.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.run("SET", |c| c.set(key, value))
    }

    fn set_ex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<(), BackendError> {
        self.run("SETEX", |c| {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value)
                .query(c)
        })
    }

    fn del(&self, key: &str) -> Result<(), BackendError> {
        self.run("DEL", |c| c.del(key))
    }

    fn lpush(&self, key: &str, value: &str) -> Result<u64, BackendError> {
        self.run("LPUSH", |c| c.lpush(key, value))
    }

    fn llen(&self, key: &str) -> Result<u64, BackendError> {
        self.run("LLEN", |c| c.llen(key))
    }

    fn lmove(
        &self,
        source: &str,
        destination: &str,
        from: ListEnd,
        to: ListEnd,
    ) -> Result<Option<String>, BackendError> {
        self.run("LMOVE", |c| {
            redis::cmd("LMOVE")
                .arg(source)
                .arg(destination)
                .arg(end_arg(from))
                .arg(end_arg(to))
                .query(c)
        })
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, BackendError> {
        self.run("LREM", |c| c.lrem(key, count as isize, value))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.run("HSET", |c| c.hset(key, field, value))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.run("HGET", |c| c.hget(key, field))
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        self.run("HGETALL", |c| c.hgetall(key))
    }

    fn hlen(&self, key: &str) -> Result<u64, BackendError> {
        self.run("HLEN", |c| c.hlen(key))
    }

    fn hvals(&self, key: &str) -> Result<Vec<String>, BackendError> {
        self.run("HVALS", |c| c.hvals(key))
    }

    fn hdel(&self, key: &str, field: &str) -> Result<u64, BackendError> {
        self.run("HDEL", |c| c.hdel(key, field))
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<u64, BackendError> {
        self.run("SADD", |c| c.sadd(key, members))
    }

    fn srem(&self, key: &str, members: &[String]) -> Result<u64, BackendError> {
        self.run("SREM", |c| c.srem(key, members))
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        self.run("SMEMBERS", |c| c.smembers(key))
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<u64, BackendError> {
        self.run("PUBLISH", |c| {
            redis::cmd("PUBLISH").arg(channel).arg(payload).query(c)
        })
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError> {
        let connection = self
            .client
            .get_connection()
            .map_err(|e| BackendError::Subscription(e.to_string()))?;
        connection
            .set_read_timeout(Some(SUBSCRIPTION_READ_TICK))
            .map_err(|e| BackendError::Subscription(e.to_string()))?;

        let (message_tx, message_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let channel_name = channel.to_string();

        // The pub/sub view borrows the connection, so a dedicated
        // reader thread owns both and forwards payloads over a channel.
        thread::spawn(move || {
            let mut connection = connection;
            let mut pubsub = connection.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel_name) {
                let _ = ready_tx.send(Err(BackendError::Subscription(e.to_string())));
                return;
            }
            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            loop {
                if reader_stop.load(Ordering::SeqCst) {
                    break;
                }
                match pubsub.get_message() {
                    Ok(message) => match message.get_payload::<String>() {
                        Ok(payload) => {
                            if message_tx.send(Ok(payload)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = message_tx
                                .send(Err(BackendError::Subscription(e.to_string())));
                            break;
                        }
                    },
                    Err(e) if e.is_timeout() => continue,
                    Err(e) => {
                        let _ =
                            message_tx.send(Err(BackendError::Disconnected(e.to_string())));
                        break;
                    }
                }
            }
            // Dropping the pub/sub view and connection here releases
            // the duplicated connection on every exit path.
        });

        match ready_rx.recv_timeout(SUBSCRIBE_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(RedisSubscription {
                messages: message_rx,
                stop,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Subscription(
                "timed out establishing subscription".into(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn on_ready(&self, listener: ReadyListener) {
        if let Ok(mut listeners) = self.ready_listeners.write() {
            listeners.push(listener);
        }
    }
}

fn end_arg(end: ListEnd) -> &'static str {
    match end {
        ListEnd::Left => "LEFT",
        ListEnd::Right => "RIGHT",
    }
}

struct RedisSubscription {
    messages: Receiver<Result<String, BackendError>>,
    stop: Arc<AtomicBool>,
}

impl Subscription for RedisSubscription {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<String>, BackendError> {
        match self.messages.recv_timeout(timeout) {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::Disconnected(
                "subscription reader terminated".into(),
            )),
        }
    }
}

impl Drop for RedisSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
