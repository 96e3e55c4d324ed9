//! In-memory backend for testing and single-process scenarios.
//!
//! Implements the full command semantics the store relies on: list
//! moves, lazy TTL expiry, pub/sub fan-out to per-subscription
//! channels, and a connectivity toggle so disconnect handling can be
//! exercised without a server. Cloning yields another handle to the
//! same storage.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::{Backend, BackendError, ListEnd, ReadyListener, Subscription};

struct StoredString {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Stores {
    strings: HashMap<String, StoredString>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

struct Shared {
    stores: Mutex<Stores>,
    channels: Mutex<HashMap<String, Vec<Sender<String>>>>,
    connected: AtomicBool,
    ready_listeners: RwLock<Vec<ReadyListener>>,
}

/// Thread-safe in-memory backend.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            shared: Arc::new(Shared {
                stores: Mutex::new(Stores::default()),
                channels: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(true),
                ready_listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Toggle simulated connectivity.
    ///
    /// While disconnected every command fails fast with a transport
    /// error. Reconnecting fires the registered ready listeners, the
    /// same as a real client recovering its connection.
    pub fn set_connected(&self, connected: bool) {
        let was = self.shared.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            if let Ok(listeners) = self.shared.ready_listeners.read() {
                for listener in listeners.iter() {
                    listener();
                }
            }
        }
    }

    fn check_connected(&self) -> Result<(), BackendError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Disconnected("memory backend offline".into()))
        }
    }

    fn with_stores<T>(
        &self,
        op: impl FnOnce(&mut Stores) -> T,
    ) -> Result<T, BackendError> {
        self.check_connected()?;
        let mut stores = self
            .shared
            .stores
            .lock()
            .map_err(|_| BackendError::LockPoisoned("stores"))?;
        Ok(op(&mut stores))
    }
}

fn live_value<'a>(stores: &'a mut Stores, key: &str) -> Option<&'a str> {
    let expired = match stores.strings.get(key) {
        Some(stored) => matches!(stored.expires_at, Some(at) if at <= Instant::now()),
        None => return None,
    };
    if expired {
        stores.strings.remove(key);
        return None;
    }
    stores.strings.get(key).map(|s| s.value.as_str())
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.with_stores(|stores| live_value(stores, key).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.with_stores(|stores| {
            stores.strings.insert(
                key.to_string(),
                StoredString {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        })
    }

    fn set_ex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<(), BackendError> {
        self.with_stores(|stores| {
            stores.strings.insert(
                key.to_string(),
                StoredString {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
                },
            );
        })
    }

    fn del(&self, key: &str) -> Result<(), BackendError> {
        self.with_stores(|stores| {
            stores.strings.remove(key);
            stores.lists.remove(key);
            stores.hashes.remove(key);
            stores.sets.remove(key);
        })
    }

    fn lpush(&self, key: &str, value: &str) -> Result<u64, BackendError> {
        self.with_stores(|stores| {
            let list = stores.lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len() as u64
        })
    }

    fn llen(&self, key: &str) -> Result<u64, BackendError> {
        self.with_stores(|stores| stores.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    fn lmove(
        &self,
        source: &str,
        destination: &str,
        from: ListEnd,
        to: ListEnd,
    ) -> Result<Option<String>, BackendError> {
        self.with_stores(|stores| {
            let element = {
                let list = match stores.lists.get_mut(source) {
                    Some(list) => list,
                    None => return None,
                };
                let element = match from {
                    ListEnd::Left => list.pop_front(),
                    ListEnd::Right => list.pop_back(),
                };
                if list.is_empty() {
                    stores.lists.remove(source);
                }
                element?
            };

            let target = stores.lists.entry(destination.to_string()).or_default();
            match to {
                ListEnd::Left => target.push_front(element.clone()),
                ListEnd::Right => target.push_back(element.clone()),
            }
            Some(element)
        })
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, BackendError> {
        self.with_stores(|stores| {
            let list = match stores.lists.get_mut(key) {
                Some(list) => list,
                None => return 0,
            };

            let mut removed = 0u64;
            let limit = count.unsigned_abs();
            let mut kept = VecDeque::with_capacity(list.len());

            if count >= 0 {
                // Head to tail; count == 0 removes every occurrence.
                for element in list.drain(..) {
                    if element == value && (count == 0 || removed < limit) {
                        removed += 1;
                    } else {
                        kept.push_back(element);
                    }
                }
            } else {
                for element in list.drain(..).rev() {
                    if element == value && removed < limit {
                        removed += 1;
                    } else {
                        kept.push_front(element);
                    }
                }
            }

            *list = kept;
            if list.is_empty() {
                stores.lists.remove(key);
            }
            removed
        })
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.with_stores(|stores| {
            stores
                .hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.with_stores(|stores| {
            stores
                .hashes
                .get(key)
                .and_then(|h| h.get(field))
                .cloned()
        })
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        self.with_stores(|stores| stores.hashes.get(key).cloned().unwrap_or_default())
    }

    fn hlen(&self, key: &str) -> Result<u64, BackendError> {
        self.with_stores(|stores| stores.hashes.get(key).map_or(0, |h| h.len() as u64))
    }

    fn hvals(&self, key: &str) -> Result<Vec<String>, BackendError> {
        self.with_stores(|stores| {
            stores
                .hashes
                .get(key)
                .map(|h| h.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn hdel(&self, key: &str, field: &str) -> Result<u64, BackendError> {
        self.with_stores(|stores| {
            let hash = match stores.hashes.get_mut(key) {
                Some(hash) => hash,
                None => return 0,
            };
            let removed = hash.remove(field).is_some() as u64;
            if hash.is_empty() {
                stores.hashes.remove(key);
            }
            removed
        })
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<u64, BackendError> {
        self.with_stores(|stores| {
            let set = stores.sets.entry(key.to_string()).or_default();
            members
                .iter()
                .map(|m| set.insert(m.clone()) as u64)
                .sum()
        })
    }

    fn srem(&self, key: &str, members: &[String]) -> Result<u64, BackendError> {
        self.with_stores(|stores| {
            let set = match stores.sets.get_mut(key) {
                Some(set) => set,
                None => return 0,
            };
            let removed = members.iter().map(|m| set.remove(m) as u64).sum();
            if set.is_empty() {
                stores.sets.remove(key);
            }
            removed
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        self.with_stores(|stores| {
            stores
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<u64, BackendError> {
        self.check_connected()?;
        let mut channels = self
            .shared
            .channels
            .lock()
            .map_err(|_| BackendError::LockPoisoned("channels"))?;
        let Some(senders) = channels.get_mut(channel) else {
            return Ok(0);
        };

        let mut delivered = 0u64;
        senders.retain(|sender| match sender.send(payload.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if senders.is_empty() {
            channels.remove(channel);
        }
        Ok(delivered)
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError> {
        self.check_connected()?;
        let (tx, rx) = mpsc::channel();
        self.shared
            .channels
            .lock()
            .map_err(|_| BackendError::LockPoisoned("channels"))?
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            messages: rx,
        }))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn on_ready(&self, listener: ReadyListener) {
        if let Ok(mut listeners) = self.shared.ready_listeners.write() {
            listeners.push(listener);
        }
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    messages: Receiver<String>,
}

impl Subscription for MemorySubscription {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<String>, BackendError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(BackendError::Disconnected("memory backend offline".into()));
        }
        match self.messages.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::Subscription(
                "publisher side closed".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn strings_set_get_del() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").unwrap(), None);
        backend.set("k", "v").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some("v".into()));
        backend.del("k").unwrap();
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn set_ex_expires_lazily() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", 1, "v").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some("v".into()));
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn lpush_prepends_and_lmove_respects_ends() {
        let backend = MemoryBackend::new();
        backend.lpush("src", "first").unwrap();
        let len = backend.lpush("src", "second").unwrap();
        assert_eq!(len, 2);

        // Oldest element sits at the right end.
        let moved = backend
            .lmove("src", "dst", ListEnd::Right, ListEnd::Left)
            .unwrap();
        assert_eq!(moved, Some("first".into()));
        assert_eq!(backend.llen("src").unwrap(), 1);
        assert_eq!(backend.llen("dst").unwrap(), 1);

        let moved = backend
            .lmove("dst", "src", ListEnd::Left, ListEnd::Right)
            .unwrap();
        assert_eq!(moved, Some("first".into()));
        assert_eq!(backend.llen("dst").unwrap(), 0);
        assert_eq!(backend.llen("src").unwrap(), 2);
    }

    #[test]
    fn lmove_from_missing_list_returns_none() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend
                .lmove("nope", "dst", ListEnd::Right, ListEnd::Left)
                .unwrap(),
            None
        );
        assert_eq!(backend.llen("dst").unwrap(), 0);
    }

    #[test]
    fn lrem_removes_first_occurrence_from_head() {
        let backend = MemoryBackend::new();
        for v in ["a", "b", "a", "c"] {
            backend.lpush("l", v).unwrap();
        }
        // Head to tail the list reads c, a, b, a.
        assert_eq!(backend.lrem("l", 1, "a").unwrap(), 1);
        assert_eq!(backend.llen("l").unwrap(), 3);
        assert_eq!(backend.lrem("l", 1, "missing").unwrap(), 0);
    }

    #[test]
    fn hash_operations() {
        let backend = MemoryBackend::new();
        backend.hset("h", "f1", "v1").unwrap();
        backend.hset("h", "f2", "v2").unwrap();
        assert_eq!(backend.hget("h", "f1").unwrap(), Some("v1".into()));
        assert_eq!(backend.hlen("h").unwrap(), 2);
        assert_eq!(backend.hgetall("h").unwrap().len(), 2);
        assert_eq!(backend.hdel("h", "f1").unwrap(), 1);
        assert_eq!(backend.hdel("h", "f1").unwrap(), 0);
        assert_eq!(backend.hvals("h").unwrap(), vec!["v2".to_string()]);
    }

    #[test]
    fn set_operations_are_idempotent() {
        let backend = MemoryBackend::new();
        let members = vec!["a".to_string(), "b".to_string()];
        assert_eq!(backend.sadd("s", &members).unwrap(), 2);
        assert_eq!(backend.sadd("s", &members).unwrap(), 0);
        assert_eq!(backend.smembers("s").unwrap().len(), 2);
        assert_eq!(backend.srem("s", &members[..1].to_vec()).unwrap(), 1);
        assert_eq!(backend.srem("s", &members[..1].to_vec()).unwrap(), 0);
    }

    #[test]
    fn publish_fans_out_to_all_subscriptions() {
        let backend = MemoryBackend::new();
        let mut sub1 = backend.subscribe("ch").unwrap();
        let mut sub2 = backend.subscribe("ch").unwrap();

        let delivered = backend.publish("ch", "hello").unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(
            sub1.next_message(Duration::from_millis(200)).unwrap(),
            Some("hello".into())
        );
        assert_eq!(
            sub2.next_message(Duration::from_millis(200)).unwrap(),
            Some("hello".into())
        );
    }

    #[test]
    fn publish_without_subscribers_delivers_zero() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.publish("ch", "x").unwrap(), 0);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let backend = MemoryBackend::new();
        let sub = backend.subscribe("ch").unwrap();
        drop(sub);
        assert_eq!(backend.publish("ch", "x").unwrap(), 0);
    }

    #[test]
    fn disconnected_commands_fail_fast() {
        let backend = MemoryBackend::new();
        backend.set_connected(false);
        assert!(matches!(
            backend.get("k"),
            Err(BackendError::Disconnected(_))
        ));
        assert!(backend.subscribe("ch").is_err());
        assert!(!backend.is_connected());
    }

    #[test]
    fn reconnect_fires_ready_listeners() {
        let backend = MemoryBackend::new();
        let (tx, rx) = channel();
        backend.on_ready(Box::new(move || {
            let _ = tx.send(());
        }));

        backend.set_connected(false);
        backend.set_connected(true);
        rx.recv_timeout(Duration::from_secs(1))
            .expect("ready listener never fired");

        // Setting connected while already connected does not re-fire.
        backend.set_connected(true);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn subscription_errors_while_disconnected() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("ch").unwrap();
        backend.set_connected(false);
        assert!(sub.next_message(Duration::from_millis(50)).is_err());
    }
}
