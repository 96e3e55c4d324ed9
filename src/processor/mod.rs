//! The storage processor: a singleton-locked run-loop that drains the
//! incoming queue and applies typed mutations to the backend.
//!
//! Exactly one processor per namespace may run cluster-wide; the TTL
//! lock in [`lock`] enforces that. The run-loop drains the queue,
//! confirming each message only after its mutation is applied, then
//! hangs on the queue's wake-up channel until the next push (or a
//! timeout). Any error inside a cycle sends the loop into a long
//! back-off that a backend `ready` event — or an explicit
//! [`StorageProcessor::trigger_waiting_cycle`] — cuts short.

mod config;
mod error;
mod lock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub use config::ProcessorConfig;
pub use error::ProcessorError;

use lock::SingletonLock;

use crate::backend::Backend;
use crate::codec;
use crate::diff::structural_diff;
use crate::keys;
use crate::message::{Message, Mutation};
use crate::queue::{QueueError, ReliableQueue, WaitControl};
use crate::state::{DiffMessage, StateVersion};

/// How often the wait watchdog re-checks for stop or deadline.
const WATCHDOG_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
#[derive(Debug)]
struct Shared {
    stopping: AtomicBool,
    stopped: AtomicBool,
    paused: AtomicBool,
    waiting_until: Mutex<Option<Instant>>,
}

impl Shared {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn backoff_deadline(&self) -> Option<Instant> {
        self.waiting_until.lock().ok().and_then(|g| *g)
    }

    fn set_backoff(&self, until: Instant) {
        if let Ok(mut guard) = self.waiting_until.lock() {
            *guard = Some(until);
        }
    }

    fn clear_backoff(&self) {
        if let Ok(mut guard) = self.waiting_until.lock() {
            *guard = None;
        }
    }
}

/// Handle onto a running storage processor.
///
/// Dropping the handle signals the loop to stop without waiting;
/// [`StorageProcessor::stop`] waits for a clean exit.
#[derive(Debug)]
pub struct StorageProcessor {
    shared: Arc<Shared>,
    instance_id: String,
    thread: Option<JoinHandle<()>>,
}

impl StorageProcessor {
    /// Acquire the namespace's singleton lock and start the run-loop.
    ///
    /// Fails fatally when the lock cannot be acquired or is lost
    /// during verification; those conditions mean another processor
    /// owns the namespace.
    pub fn start(
        backend: Arc<dyn Backend>,
        namespace: impl Into<String>,
        queue_id: impl Into<String>,
        config: ProcessorConfig,
    ) -> Result<Self, ProcessorError> {
        let namespace = namespace.into();
        let queue_id = queue_id.into();

        let lock = SingletonLock::acquire(Arc::clone(&backend), &namespace, &config)?;
        let instance_id = lock.instance_id().to_string();

        let shared = Arc::new(Shared::default());
        {
            // A recovered connection ends any back-off immediately.
            let shared = Arc::clone(&shared);
            backend.on_ready(Box::new(move || shared.clear_backoff()));
        }

        let worker = Worker {
            queue: ReliableQueue::new(Arc::clone(&backend), namespace.clone()),
            backend,
            namespace,
            queue_id,
            config,
            shared: Arc::clone(&shared),
            lock,
        };
        let thread = thread::spawn(move || worker.run());

        Ok(StorageProcessor {
            shared,
            instance_id,
            thread: Some(thread),
        })
    }

    /// Instance id written into the singleton lock.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Cut short an error back-off, if one is in progress.
    pub fn trigger_waiting_cycle(&self) {
        self.shared.clear_backoff();
    }

    /// Suspend processing after the current cycle.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Resume a paused processor.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Whether the run-loop has fully exited.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Signal the loop to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StorageProcessor {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
    }
}

struct Worker {
    backend: Arc<dyn Backend>,
    queue: ReliableQueue,
    namespace: String,
    queue_id: String,
    config: ProcessorConfig,
    shared: Arc<Shared>,
    lock: SingletonLock,
}

impl Worker {
    fn run(self) {
        info!(
            namespace = %self.namespace,
            queue_id = %self.queue_id,
            instance_id = %self.lock.instance_id(),
            "storage processor started"
        );

        loop {
            if self.shared.is_stopping() {
                break;
            }
            if self.shared.paused.load(Ordering::SeqCst) {
                thread::sleep(self.config.backoff_poll);
                continue;
            }
            if let Some(until) = self.shared.backoff_deadline() {
                if Instant::now() < until {
                    thread::sleep(self.config.backoff_poll);
                    continue;
                }
                self.shared.clear_backoff();
            }

            if let Err(e) = self.cycle() {
                warn!(error = %e, "processor cycle failed, backing off");
                self.shared
                    .set_backoff(Instant::now() + self.config.error_backoff);
            }
        }

        let Worker { shared, lock, .. } = self;
        lock.release();
        shared.stopped.store(true, Ordering::SeqCst);
        info!("storage processor stopped");
    }

    /// One pass: drain the queue, then hang on the wake-up channel.
    ///
    /// Errors while draining leave the current message unconfirmed and
    /// bubble up into the back-off; a failed or timed-out wait is
    /// normal and just starts the next cycle.
    fn cycle(&self) -> Result<(), ProcessorError> {
        if !self.backend.is_connected() {
            return Err(ProcessorError::Disconnected);
        }

        while let Some(picked) = self.queue.pop_next(&self.queue_id)? {
            if self.shared.is_stopping() {
                return Ok(());
            }
            self.apply(picked.message())?;
            self.queue.confirm(&self.queue_id, picked.handle())?;
        }

        if self.shared.is_stopping() {
            return Ok(());
        }

        let control = WaitControl::new();
        let watchdog = {
            let control = control.clone();
            let shared = Arc::clone(&self.shared);
            let deadline = Instant::now() + self.config.signal_timeout;
            thread::spawn(move || {
                while !control.is_cancelled()
                    && !shared.is_stopping()
                    && Instant::now() < deadline
                {
                    thread::sleep(WATCHDOG_POLL);
                }
                control.cancel();
            })
        };

        let result = self.queue.wait_for_signal(&self.queue_id, &control);
        control.cancel();
        let _ = watchdog.join();

        match result {
            Ok(_) => debug!("woken by queue signal"),
            Err(QueueError::Cancelled) => debug!("queue wait timed out or was cancelled"),
            Err(e) => warn!(error = %e, "queue wait failed"),
        }
        Ok(())
    }

    fn apply(&self, message: &Message) -> Result<(), ProcessorError> {
        match message.mutation()? {
            Mutation::WriteSimpleValue { key, value } => {
                self.backend
                    .set(&keys::simple_value(&self.namespace, &key), &value)?;
            }
            Mutation::WriteStateObject { key, value } => {
                self.apply_state_write(&key, &value)?;
            }
            Mutation::WriteHashmapValue { key, field, value } => {
                let map_key = keys::hashmap(&self.namespace, &key);
                match value {
                    Some(value) => self.backend.hset(&map_key, &field, &value)?,
                    // A null value deletes the field instead of
                    // leaving a tombstone behind.
                    None => {
                        self.backend.hdel(&map_key, &field)?;
                    }
                }
            }
            Mutation::AddStringsToSet { key, values } => {
                if !values.is_empty() {
                    self.backend
                        .sadd(&keys::string_set(&self.namespace, &key), &values)?;
                }
            }
            Mutation::RemoveStringsFromSet { key, values } => {
                if !values.is_empty() {
                    self.backend
                        .srem(&keys::string_set(&self.namespace, &key), &values)?;
                }
            }
            Mutation::Unknown { kind } => {
                warn!(%kind, "skipping message of unknown type");
            }
        }
        Ok(())
    }

    /// Versioned state write: bump the version, persist, then publish
    /// the structural delta. The new record must be durable before the
    /// delta goes out, so a subscriber can never see a delta ahead of
    /// the snapshot it would read.
    fn apply_state_write(&self, key: &str, serialized: &str) -> Result<(), ProcessorError> {
        let incoming = codec::decode_value(serialized)?;
        let state_key = keys::state(&self.namespace, key);

        let current = match self.backend.get(&state_key)? {
            Some(raw) => Some(codec::decode::<StateVersion>(&raw)?),
            None => None,
        };
        let (old_value, next_version) = match current {
            Some(record) => (record.value, record.version + 1),
            None => (Value::Object(Map::new()), 1),
        };

        let written_at = Utc::now();
        if codec::is_empty_object(&incoming) {
            // Writing the empty object deletes the record; the next
            // write starts a fresh version chain at 1.
            self.backend.del(&state_key)?;
        } else {
            let record = StateVersion {
                version: next_version,
                written_at,
                value: incoming.clone(),
            };
            self.backend.set(&state_key, &codec::encode(&record)?)?;
        }

        let delta_payload = structural_diff(&old_value, &incoming).unwrap_or(Value::Null);
        let diff = DiffMessage {
            from_version: next_version - 1,
            to_version: next_version,
            written_at,
            delta_payload,
        };
        self.backend.publish(
            &keys::state_delta_channel(&self.namespace, key),
            &codec::encode(&diff)?,
        )?;
        Ok(())
    }
}
