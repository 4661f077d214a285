//! The checkpoint surface served to a workflow engine
//!
//! [`CheckpointSaver`] is the seam between an execution engine and checkpoint
//! persistence. [`CheckpointStore`](crate::CheckpointStore) implements it over
//! any [`KvBackend`](crate::KvBackend); the blocking surface
//! ([`BlockingCheckpointStore`](crate::BlockingCheckpointStore)) wraps any
//! implementation.
//!
//! # Capability check at configuration time
//!
//! ```rust
//! use checkpoint_kv::{BackendCapabilityProfile, CheckpointSaver, CheckpointStore, InMemoryBackend, StoreConfig};
//!
//! let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());
//! let store = CheckpointStore::new(backend, StoreConfig::default()).unwrap();
//!
//! let caps = store.capabilities();
//! if !caps.supports_history() {
//!     // pick another backend or pair this one with a list-capable index backend
//! }
//! assert!(!caps.list.is_supported());
//! ```
//!
//! # Errors
//!
//! Operations a backend cannot serve fail immediately with an error naming the
//! missing [`Capability`](crate::Capability):
//!
//! | Operation | Error |
//! |-----------|-------|
//! | `get_tuple` without id | [`CheckpointError::LatestLookupUnsupported`] |
//! | `list` | [`CheckpointError::ListUnsupported`] |
//! | `delete_thread` | [`CheckpointError::DeleteUnsupported`] |

use crate::capability::StoreCapabilities;
use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, MetadataFilter, PendingWriteEntry,
};
use crate::error::{CheckpointError, Result};
use crate::writes::WriteReceipt;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Type alias for async stream of checkpoint tuples
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Core trait for checkpoint persistence
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// What the bound backend(s) allow, per operation
    fn capabilities(&self) -> StoreCapabilities;

    /// Store a checkpoint in the thread and namespace of `config`.
    ///
    /// `config.checkpoint_id`, when set, becomes the new checkpoint's parent.
    /// Returns a config pointing at the new checkpoint, suitable as the
    /// `config` of the next `put`.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::WriteFailed`] if the record could not be written.
    ///   A failed index append after a successful record write is *not* an
    ///   error; it is reported to the store's observer.
    /// - [`CheckpointError::KeyTooLongAfterHashing`]
    /// - [`CheckpointError::DeadlineExceeded`]
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Fetch the checkpoint named by `config.checkpoint_id`, or the latest one
    /// of the namespace when no id is given, with its pending writes.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::NotFound`] for an absent id or an empty namespace
    /// - [`CheckpointError::LatestLookupUnsupported`] for a latest lookup
    ///   without an ordered index
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<CheckpointTuple>;

    /// Like [`get_tuple`](Self::get_tuple) with `NotFound` mapped to `None`
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        match self.get_tuple(config).await {
            Ok(tuple) => Ok(Some(tuple)),
            Err(CheckpointError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// History of one namespace, newest first.
    ///
    /// - `before` - only checkpoints older than `before.checkpoint_id`
    /// - `limit` - at most this many index entries are read; `filter` is
    ///   applied afterwards, so a filtered page may be shorter
    ///
    /// The id range is fixed when this call returns; records are fetched
    /// lazily as the stream is polled. The stream is finite and not
    /// restartable.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::ListUnsupported`] without an ordered index
    /// - [`CheckpointError::CursorNotFound`] if `before` is no longer indexed
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Append intermediate writes to the checkpoint named by `config`.
    ///
    /// The receipt states whether concurrent appends are protected
    /// ([`WriteConsistency::Atomic`](crate::WriteConsistency::Atomic)) or not.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Invalid`] if `config` has no checkpoint id
    /// - [`CheckpointError::WriteContention`] when compare-and-swap retries run out
    async fn put_writes(&self, config: &CheckpointConfig, writes: Vec<PendingWriteEntry>) -> Result<WriteReceipt>;

    /// Delete every checkpoint, pending write and index of `config.thread_id`
    /// across all namespaces. `checkpoint_ns` and `checkpoint_id` are ignored.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::DeleteUnsupported`] without ordered index or key enumeration
    /// - [`CheckpointError::PartialDeleteFailure`] listing the keys that remain;
    ///   the call can be repeated
    async fn delete_thread(&self, config: &CheckpointConfig) -> Result<()>;
}
