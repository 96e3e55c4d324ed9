//! Reliable, write-serialized, versioned key-value state store over a
//! Redis-like backend.
//!
//! Producers enqueue mutation messages onto a reliable queue; a
//! cluster-wide singleton [`StorageProcessor`] drains it, applies each
//! mutation, and publishes a structural diff per versioned write.
//! Readers fetch snapshots directly or join a live delta stream that
//! is consistent with the snapshot they read.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use statebus::{
//!     MemoryBackend, ProcessorConfig, ReliableQueue, StateReader, StateWriter,
//!     StorageProcessor,
//! };
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let processor = StorageProcessor::start(
//!     backend.clone(),
//!     "demo",
//!     "jobs",
//!     ProcessorConfig::default(),
//! )?;
//!
//! let writer = StateWriter::new(ReliableQueue::new(backend.clone(), "demo"), "jobs");
//! writer.write_state_object("game", &json!({"stage": 1}))?;
//!
//! let reader = StateReader::new(backend, "demo");
//! let _subscription = reader.fetch_state_and_listen(
//!     "game",
//!     |full| println!("snapshot v{}", full.version),
//!     |delta| println!("delta {} -> {}", delta.from_version, delta.to_version),
//!     |err| eprintln!("subscription ended: {}", err),
//! );
//!
//! processor.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod backend;
mod codec;
mod diff;
pub mod keys;
mod message;
mod processor;
mod queue;
mod reader;
mod state;
mod writer;

pub use backend::{
    Backend, BackendError, ListEnd, MemoryBackend, ReadyListener, RedisBackend, Subscription,
};
pub use codec::{decode, decode_value, encode, is_empty_object, CodecError};
pub use diff::{apply_structural_diff, structural_diff, DiffError};
pub use message::{Message, MessageWithHandle, Mutation};
pub use processor::{ProcessorConfig, ProcessorError, StorageProcessor};
pub use queue::{QueueError, ReliableQueue, WaitControl};
pub use reader::{ReadError, StateReader, StateSubscription, SubscribeError};
pub use state::{DiffMessage, StateVersion};
pub use writer::StateWriter;
