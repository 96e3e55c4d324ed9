//! Live state subscription: snapshot first, then gated deltas.
//!
//! The subscription owns a dedicated pub/sub connection and a reader
//! thread. Subscribing happens *before* the snapshot read, so a delta
//! published in between is simply discarded by the version gate rather
//! than lost. On transport failure the thread drops its connection and
//! re-runs the subscribe-then-snapshot sequence; deltas missed while
//! disconnected are subsumed by the fresh snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::SubscribeError;
use crate::backend::Backend;
use crate::codec;
use crate::keys;
use crate::state::{DiffMessage, StateVersion};

/// How long one blocking read on the delta channel lasts before the
/// stop flag is re-checked.
const DELTA_POLL: Duration = Duration::from_millis(500);
/// Pause before retrying after a lost connection.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Handle onto a live subscription.
///
/// [`unsubscribe`](StateSubscription::unsubscribe) only sets a flag,
/// so it is idempotent and safe to call from inside any callback; the
/// reader thread delivers the final `Unsubscribed` error and releases
/// the connection shortly after.
pub struct StateSubscription {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StateSubscription {
    pub fn unsubscribe(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Unsubscribe and wait for the reader thread to finish.
    ///
    /// Must not be called from inside a callback — it would wait on
    /// the thread running that callback.
    pub fn join(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

pub(super) fn spawn<F, D, E>(
    backend: Arc<dyn Backend>,
    namespace: &str,
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
    let stop = Arc::new(AtomicBool::new(false));
    let state_key = keys::state(namespace, key);
    let channel = keys::state_delta_channel(namespace, key);
    let key = key.to_string();
    let thread_stop = Arc::clone(&stop);

    let thread = thread::spawn(move || {
        listen(
            backend,
            &state_key,
            &channel,
            &key,
            &thread_stop,
            on_full,
            on_delta,
            on_error,
        );
    });

    StateSubscription {
        stop,
        thread: Some(thread),
    }
}

#[allow(clippy::too_many_arguments)]
fn listen<F, D, E>(
    backend: Arc<dyn Backend>,
    state_key: &str,
    channel: &str,
    key: &str,
    stop: &AtomicBool,
    on_full: F,
    on_delta: D,
    on_error: E,
) where
    F: Fn(StateVersion),
    D: Fn(DiffMessage),
    E: Fn(SubscribeError),
{
    loop {
        if stop.load(Ordering::SeqCst) {
            on_error(SubscribeError::Unsubscribed);
            return;
        }

        // Subscribe before reading the snapshot; the version gate
        // below discards any delta that predates it.
        let mut subscription = match backend.subscribe(channel) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(channel, error = %e, "subscribe failed, retrying");
                if sleep_unless_stopped(RESUBSCRIBE_DELAY, stop) {
                    on_error(SubscribeError::Unsubscribed);
                    return;
                }
                continue;
            }
        };

        let snapshot = match backend.get(state_key) {
            Ok(Some(raw)) => match codec::decode::<StateVersion>(&raw) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    on_error(SubscribeError::Codec(e));
                    return;
                }
            },
            Ok(None) => {
                on_error(SubscribeError::MissingState {
                    key: key.to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(state_key, error = %e, "snapshot read failed, retrying");
                drop(subscription);
                if sleep_unless_stopped(RESUBSCRIBE_DELAY, stop) {
                    on_error(SubscribeError::Unsubscribed);
                    return;
                }
                continue;
            }
        };

        let mut current_version = snapshot.version;
        debug!(state_key, version = current_version, "subscriber snapshot");
        on_full(snapshot);

        loop {
            if stop.load(Ordering::SeqCst) {
                on_error(SubscribeError::Unsubscribed);
                return;
            }
            match subscription.next_message(DELTA_POLL) {
                Ok(Some(payload)) => {
                    let diff: DiffMessage = match codec::decode(&payload) {
                        Ok(diff) => diff,
                        Err(e) => {
                            warn!(channel, error = %e, "discarding undecodable delta");
                            continue;
                        }
                    };
                    if diff.from_version == current_version {
                        current_version = diff.to_version;
                        on_delta(diff);
                    } else {
                        warn!(
                            channel,
                            expected = current_version,
                            from_version = diff.from_version,
                            "discarding out-of-sequence delta"
                        );
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    // Lost the dedicated connection: resubscribe and
                    // take a fresh snapshot, which subsumes anything
                    // missed in between.
                    warn!(channel, error = %e, "subscription lost, resubscribing");
                    break;
                }
            }
        }
    }
}

/// Sleep in short steps; returns true when the stop flag was raised.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
