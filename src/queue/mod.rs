//! Reliable queue with at-least-once delivery.
//!
//! Two backend lists implement the move-and-confirm protocol: `push`
//! prepends to the main list, `pop_next` atomically moves the oldest
//! message into a processing list and hands back its exact bytes as
//! the confirmation handle, and `confirm` removes that entry once the
//! message has been applied. Anything left in the processing list by a
//! crashed consumer is drained back onto the main list on the next
//! pop, so no pushed message is ever lost — it may just be delivered
//! again.
//!
//! Every push also publishes `"PUSH"` on a wake-up channel so an idle
//! consumer can hang in [`ReliableQueue::wait_for_signal`] instead of
//! polling.

mod error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub use error::QueueError;

use crate::backend::{Backend, ListEnd};
use crate::codec;
use crate::keys;
use crate::message::{Message, MessageWithHandle};

/// Cancellation flag shared between a waiting consumer and whoever
/// decides the wait is over. Polled roughly once a second.
#[derive(Clone, Debug, Default)]
pub struct WaitControl {
    cancelled: Arc<AtomicBool>,
}

impl WaitControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Handle onto the pair of lists and the wake channel of one queue.
#[derive(Clone)]
pub struct ReliableQueue {
    backend: Arc<dyn Backend>,
    namespace: String,
}

impl ReliableQueue {
    pub fn new(backend: Arc<dyn Backend>, namespace: impl Into<String>) -> Self {
        ReliableQueue {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Serialize and enqueue a message, returning the new queue length.
    ///
    /// The wake-up publish must also succeed; its failure surfaces as
    /// an error without rolling back the push, since a duplicate wake
    /// signal is harmless but a missing message is not.
    pub fn push(&self, queue_id: &str, message: &Message) -> Result<u64, QueueError> {
        let serialized = codec::encode(message)?;
        let length = self
            .backend
            .lpush(&keys::queue(&self.namespace, queue_id), &serialized)?;
        self.backend.publish(
            &keys::queue_channel(&self.namespace, queue_id),
            keys::PUSH_PAYLOAD,
        )?;
        Ok(length)
    }

    /// Move the oldest message into the processing list and return it
    /// with its confirmation handle, or `None` if the queue is empty.
    ///
    /// Before popping, any messages a previous consumer left in the
    /// processing list are drained back onto the queue tail, so they
    /// are redelivered rather than lost.
    pub fn pop_next(&self, queue_id: &str) -> Result<Option<MessageWithHandle>, QueueError> {
        let main = keys::queue(&self.namespace, queue_id);
        let processing = keys::queue_processing(&self.namespace, queue_id);

        while self.backend.llen(&processing)? > 0 {
            match self
                .backend
                .lmove(&processing, &main, ListEnd::Left, ListEnd::Right)?
            {
                Some(_) => {
                    warn!(queue_id, "requeued unconfirmed in-flight message");
                }
                None => break,
            }
        }

        let raw = match self
            .backend
            .lmove(&main, &processing, ListEnd::Right, ListEnd::Left)?
        {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let message: Message = codec::decode(&raw)?;
        Ok(Some(MessageWithHandle::new(message, raw)))
    }

    /// Confirm a processed message by its handle.
    ///
    /// Exactly one entry must be removed from the processing list;
    /// anything else means a double confirm or a concurrent second
    /// consumer, and surfaces as [`QueueError::ConfirmInconsistency`].
    pub fn confirm(&self, queue_id: &str, handle: &str) -> Result<(), QueueError> {
        let removed = self
            .backend
            .lrem(&keys::queue_processing(&self.namespace, queue_id), 1, handle)?;
        if removed != 1 {
            return Err(QueueError::ConfirmInconsistency { removed });
        }
        Ok(())
    }

    /// Block until something is pushed onto the queue.
    ///
    /// Subscribes a dedicated connection to the wake channel and
    /// resolves with the first published payload. The control flag is
    /// polled about once a second; cancelling it ends the wait with
    /// [`QueueError::Cancelled`]. The dedicated connection is released
    /// on every exit path.
    pub fn wait_for_signal(
        &self,
        queue_id: &str,
        control: &WaitControl,
    ) -> Result<String, QueueError> {
        let mut subscription = self
            .backend
            .subscribe(&keys::queue_channel(&self.namespace, queue_id))?;

        loop {
            if control.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if let Some(payload) = subscription.next_message(SIGNAL_POLL_INTERVAL)? {
                return Ok(payload);
            }
        }
    }

    /// Number of messages waiting in the main list.
    pub fn size(&self, queue_id: &str) -> Result<u64, QueueError> {
        Ok(self.backend.llen(&keys::queue(&self.namespace, queue_id))?)
    }

    /// Delete both lists of the queue. Administrative use only.
    pub fn delete(&self, queue_id: &str) -> Result<(), QueueError> {
        self.backend.del(&keys::queue(&self.namespace, queue_id))?;
        self.backend
            .del(&keys::queue_processing(&self.namespace, queue_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::message::Mutation;
    use std::thread;
    use std::time::Instant;

    fn queue() -> (ReliableQueue, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (ReliableQueue::new(backend.clone(), "T"), backend)
    }

    fn test_message(n: u32) -> Message {
        Message::with_occurred_at(
            Mutation::WriteSimpleValue {
                key: format!("k{}", n),
                value: n.to_string(),
            },
            "2024-01-01T00:00:00Z".parse().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn push_pop_confirm_lifecycle() {
        let (queue, _) = queue();
        let message = test_message(1);

        assert_eq!(queue.push("Q", &message).unwrap(), 1);
        assert_eq!(queue.size("Q").unwrap(), 1);

        let picked = queue.pop_next("Q").unwrap().expect("queue was empty");
        assert_eq!(picked.message(), &message);
        assert_eq!(queue.size("Q").unwrap(), 0);

        queue.confirm("Q", picked.handle()).unwrap();

        // A second confirm on the same handle is an inconsistency.
        let err = queue.confirm("Q", picked.handle()).unwrap_err();
        assert!(matches!(
            err,
            QueueError::ConfirmInconsistency { removed: 0 }
        ));
    }

    #[test]
    fn unconfirmed_pop_is_redelivered() {
        let (queue, _) = queue();
        let message = test_message(1);
        queue.push("Q", &message).unwrap();

        let first = queue.pop_next("Q").unwrap().expect("first pop");
        // No confirm: the next pop drains the processing list and
        // redelivers the same body.
        let second = queue.pop_next("Q").unwrap().expect("second pop");
        assert_eq!(first.message(), second.message());
        assert_eq!(first.handle(), second.handle());

        queue.confirm("Q", second.handle()).unwrap();
        assert!(queue.pop_next("Q").unwrap().is_none());
    }

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let (queue, backend) = queue();
        assert!(queue.pop_next("Q").unwrap().is_none());
        assert_eq!(backend.llen("T-QP-Q").unwrap(), 0);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (queue, _) = queue();
        for n in 1..=3 {
            queue.push("Q", &test_message(n)).unwrap();
        }

        for n in 1..=3 {
            let picked = queue.pop_next("Q").unwrap().expect("pop");
            assert_eq!(picked.message(), &test_message(n));
            queue.confirm("Q", picked.handle()).unwrap();
        }
    }

    #[test]
    fn crash_recovery_requeues_in_flight_messages_in_order() {
        let (queue, backend) = queue();

        // Simulate a crashed consumer that had popped m1 and then m2:
        // each pop prepends to the processing list, so it reads m2, m1.
        let m1 = codec::encode(&test_message(1)).unwrap();
        let m2 = codec::encode(&test_message(2)).unwrap();
        backend.lpush("T-QP-Q", &m1).unwrap();
        backend.lpush("T-QP-Q", &m2).unwrap();
        queue.push("Q", &test_message(3)).unwrap();

        // The replacement consumer sees all three, oldest first.
        for n in 1..=3 {
            let picked = queue.pop_next("Q").unwrap().expect("recovered pop");
            assert_eq!(picked.message(), &test_message(n));
            queue.confirm("Q", picked.handle()).unwrap();
        }
        assert!(queue.pop_next("Q").unwrap().is_none());
    }

    #[test]
    fn confirm_with_foreign_handle_fails() {
        let (queue, _) = queue();
        queue.push("Q", &test_message(1)).unwrap();
        let picked = queue.pop_next("Q").unwrap().expect("pop");

        let err = queue.confirm("Q", "not-a-real-handle").unwrap_err();
        assert!(matches!(
            err,
            QueueError::ConfirmInconsistency { removed: 0 }
        ));

        queue.confirm("Q", picked.handle()).unwrap();
    }

    #[test]
    fn wait_for_signal_wakes_on_push() {
        let (queue, _) = queue();
        let waiter = queue.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            let control = WaitControl::new();
            waiter.wait_for_signal("Q", &control)
        });

        thread::sleep(Duration::from_millis(300));
        queue.push("Q", &test_message(1)).unwrap();

        let payload = handle.join().unwrap().expect("wait failed");
        assert_eq!(payload, "PUSH");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250), "woke too early");
        assert!(elapsed < Duration::from_secs(2), "woke too late");
    }

    #[test]
    fn wait_for_signal_honours_cancellation() {
        let (queue, _) = queue();
        let control = WaitControl::new();
        let waiter_control = control.clone();

        let handle = thread::spawn(move || {
            let started = Instant::now();
            let result = queue.wait_for_signal("Q", &waiter_control);
            (result, started.elapsed())
        });

        thread::sleep(Duration::from_millis(200));
        control.cancel();

        let (result, elapsed) = handle.join().unwrap();
        assert!(matches!(result, Err(QueueError::Cancelled)));
        assert!(elapsed < Duration::from_millis(1600), "cancel took {:?}", elapsed);
    }

    #[test]
    fn delete_clears_both_lists() {
        let (queue, backend) = queue();
        queue.push("Q", &test_message(1)).unwrap();
        queue.push("Q", &test_message(2)).unwrap();
        queue.pop_next("Q").unwrap().expect("pop");

        queue.delete("Q").unwrap();
        assert_eq!(queue.size("Q").unwrap(), 0);
        assert_eq!(backend.llen("T-QP-Q").unwrap(), 0);
        assert!(queue.pop_next("Q").unwrap().is_none());
    }
}
