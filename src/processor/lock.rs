//! Cluster-wide singleton lock with a TTL heartbeat.
//!
//! The lock is an ordinary backend key holding the owner's instance
//! id. Acquisition reads until the key is free, writes itself in with
//! `SETEX`, then re-reads after a settle delay to catch a racing
//! acquirer. A heartbeat thread re-issues the `SETEX` at an interval
//! strictly below the TTL, so the lock survives the owner but not a
//! crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::ProcessorConfig;
use super::error::ProcessorError;
use crate::backend::Backend;
use crate::keys;

pub(crate) struct SingletonLock {
    backend: Arc<dyn Backend>,
    key: String,
    instance_id: String,
    stop: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SingletonLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonLock")
            .field("key", &self.key)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl SingletonLock {
    /// Acquire the namespace's processor lock or fail fatally.
    pub fn acquire(
        backend: Arc<dyn Backend>,
        namespace: &str,
        config: &ProcessorConfig,
    ) -> Result<Self, ProcessorError> {
        let key = keys::processor_lock(namespace);
        let instance_id = Uuid::new_v4().to_string();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match backend.get(&key)? {
                None => break,
                Some(holder) => {
                    warn!(lock = %key, %holder, attempt, "singleton lock is held, waiting");
                    if attempt >= config.lock_attempts {
                        return Err(ProcessorError::LockAttemptsExhausted { attempts: attempt });
                    }
                    thread::sleep(config.lock_retry_delay);
                }
            }
        }

        backend.set_ex(&key, config.lock_ttl_seconds, &instance_id)?;

        // Let a racing acquirer overwrite us before we claim victory.
        thread::sleep(config.lock_verify_delay);
        let holder = backend.get(&key)?;
        if holder.as_deref() != Some(instance_id.as_str()) {
            return Err(ProcessorError::LockLost {
                expected: instance_id,
                actual: holder,
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let heartbeat = {
            let backend = Arc::clone(&backend);
            let key = key.clone();
            let instance_id = instance_id.clone();
            let stop = Arc::clone(&stop);
            let interval = config.heartbeat_interval;
            let ttl = config.lock_ttl_seconds;
            thread::spawn(move || {
                loop {
                    sleep_unless_stopped(interval, &stop);
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match backend.set_ex(&key, ttl, &instance_id) {
                        Ok(()) => debug!(lock = %key, "heartbeat re-issued lock"),
                        Err(e) => warn!(lock = %key, error = %e, "heartbeat failed"),
                    }
                }
            })
        };

        info!(lock = %key, %instance_id, "singleton lock acquired");
        Ok(SingletonLock {
            backend,
            key,
            instance_id,
            stop,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Stop the heartbeat and delete the lock key if still owned.
    ///
    /// A crashed owner never reaches this; its lock lapses by TTL.
    pub fn release(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.join();
        }
        if let Ok(Some(holder)) = self.backend.get(&self.key) {
            if holder == self.instance_id {
                if let Err(e) = self.backend.del(&self.key) {
                    warn!(lock = %self.key, error = %e, "failed to delete lock on release");
                }
            }
        }
        info!(lock = %self.key, "singleton lock released");
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
