//! # checkpoint-kv - Versioned Checkpoints over Key-Value Backends
//!
//! **A thread-scoped, versioned checkpoint store** for workflow engines, built
//! on key-value backends that may or may not provide ordered lists, key
//! enumeration, multi-key transactions or compare-and-swap.
//!
//! ## Overview
//!
//! Every checkpoint belongs to a *thread namespace* `(thread_id, namespace)`,
//! an independent timeline. The store provides:
//!
//! - **Atomic append** - record and ordering entry written in one transaction when the backend allows it
//! - **Strict recency** - the latest checkpoint is always rank 0 of the namespace's ordering index
//! - **Paginated history** - `before` cursors, limits and metadata filters over a lazy stream
//! - **Bulk deletion** - every namespace of a thread, with partial failures reported
//! - **Honest capabilities** - operations a backend cannot serve fail fast, naming what is missing
//!
//! ## Core Concepts
//!
//! ### 1. Capability profiles
//!
//! A [`KvBackend`] declares a [`BackendCapabilityProfile`]. The store turns the
//! profile into a [`StoreCapabilities`] report so an engine can reject an
//! unsuitable backend at configuration time:
//!
//! | Profile | Latest / list | Delete thread | Pending writes |
//! |---------|---------------|---------------|----------------|
//! | [`BackendCapabilityProfile::full`] (Redis-like) | exact | exact | atomic list |
//! | [`BackendCapabilityProfile::key_value`] (Memcached-like) | unsupported | unsupported | CAS retry |
//! | [`BackendCapabilityProfile::minimal`] | unsupported | unsupported | advisory |
//!
//! A plain key-value backend regains history by pairing it with a list-capable
//! index backend ([`CheckpointStore::with_index_backend`]).
//!
//! ### 2. Components
//!
//! - [`KeyCodec`] - deterministic key layout with digest substitution for long keys
//! - [`RecordStore`] - immutable checkpoint records
//! - [`OrderingIndex`] - newest-first id lists plus the per-thread namespace registry
//! - [`PendingWritesBuffer`] - append-only intermediate writes
//! - [`CheckpointStore`] - composes the above behind [`CheckpointSaver`]
//!
//! ### 3. Sync and async
//!
//! [`CheckpointSaver`] is async. [`BlockingCheckpointStore`] offers the same
//! operations to synchronous callers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkpoint_kv::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointStore,
//!     InMemoryBackend, PendingWriteEntry, StoreConfig,
//! };
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CheckpointStore::new(InMemoryBackend::new(), StoreConfig::from_env()?)?;
//!
//!     // Save a checkpoint
//!     let config = CheckpointConfig::new("thread-123");
//!     let checkpoint = Checkpoint::with_generated_id(b"state".to_vec());
//!     let saved = store.put(&config, checkpoint, CheckpointMetadata::new().with_step(0)).await?;
//!
//!     // Record intermediate writes of the saved checkpoint
//!     store
//!         .put_writes(&saved, vec![PendingWriteEntry::new("messages", b"hi".to_vec(), "task-1", "")])
//!         .await?;
//!
//!     // Load the latest checkpoint
//!     let latest = store.get_tuple(&config).await?;
//!     println!("latest: {} with {} writes", latest.checkpoint_id(), latest.pending_writes.len());
//!
//!     // Walk the history
//!     let history: Vec<_> = store.list(&config, None, None, Some(10)).await?.try_collect().await?;
//!     println!("{} checkpoints", history.len());
//!
//!     store.delete_thread(&config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`CheckpointError`]. Transient
//! backend errors on idempotent reads are retried per [`RetryConfig`]; writes
//! are never retried implicitly.

pub mod backend;
pub mod blocking;
pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod deadline;
pub mod error;
pub mod index;
pub mod keys;
pub mod memory;
pub mod observe;
pub mod records;
pub mod retry;
pub mod serializer;
pub mod store;
pub mod traits;
pub mod writes;

pub use backend::{CasToken, KvBackend, KvOp, KvOpOutcome};
pub use blocking::{BlockingCheckpointIter, BlockingCheckpointStore};
pub use capability::{BackendCapabilityProfile, Capability, OperationSupport, StoreCapabilities};
pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointRecord, CheckpointSource,
    CheckpointTuple, MetadataFilter, PendingWriteEntry, ThreadNamespace, DEFAULT_NAMESPACE,
};
pub use config::{StoreConfig, SupersededWrites};
pub use deadline::Deadline;
pub use error::{CheckpointError, Result};
pub use index::OrderingIndex;
pub use keys::{DecodedKey, KeyCodec, KeyKind, KeySegment};
pub use memory::{Fault, FaultOp, InMemoryBackend};
pub use observe::{ObservedEvent, RecordingObserver, StoreObserver, TracingObserver};
pub use records::RecordStore;
pub use retry::RetryConfig;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use store::CheckpointStore;
pub use traits::{CheckpointSaver, CheckpointStream};
pub use writes::{PendingWritesBuffer, WriteConsistency, WriteReceipt, WriteStrategy};
