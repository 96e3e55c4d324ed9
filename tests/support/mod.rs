//! Shared helpers for the integration suites.

use std::sync::Arc;
use std::time::{Duration, Instant};

use statebus::{MemoryBackend, ProcessorConfig, ReliableQueue, StateReader, StateWriter};

/// Production timings shrunk to keep the suites fast.
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_lock_attempts(3)
        .with_lock_retry_delay(Duration::from_millis(20))
        .with_lock_verify_delay(Duration::from_millis(10))
        .with_heartbeat_interval(Duration::from_millis(200))
        .with_signal_timeout(Duration::from_millis(500))
        .with_error_backoff(Duration::from_millis(300))
        .with_backoff_poll(Duration::from_millis(20))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub writer: StateWriter,
    pub reader: StateReader,
    pub queue: ReliableQueue,
}

/// Backend, writer and reader wired to one namespace and queue.
pub fn harness(namespace: &str, queue_id: &str) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let queue = ReliableQueue::new(backend.clone(), namespace);
    Harness {
        writer: StateWriter::new(queue.clone(), queue_id),
        reader: StateReader::new(backend.clone(), namespace),
        queue,
        backend,
    }
}
