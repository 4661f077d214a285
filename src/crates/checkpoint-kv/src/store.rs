//! Checkpoint store over key-value backends
//!
//! [`CheckpointStore`] composes the [`RecordStore`], [`OrderingIndex`] and
//! [`PendingWritesBuffer`] and decides per operation, from the bound backends'
//! capability profiles, whether it runs exactly, with a relaxed guarantee, or
//! fails fast naming the missing capability.
//!
//! # Backends
//!
//! Records and pending writes live on the *record backend*. The ordering index
//! and namespace registry live on the *index backend*, which defaults to the
//! record backend and may be replaced with [`CheckpointStore::with_index_backend`]
//! to pair a plain key-value store with a list-capable one.
//!
//! | Operation | Needs |
//! |-----------|-------|
//! | `put` | nothing (atomic only with one shared backend that has transactions) |
//! | `get_tuple` by id | nothing |
//! | `get_tuple` latest | ordered list on the index backend |
//! | `list` | ordered list on the index backend |
//! | `delete_thread` | ordered list on the index backend, or key enumeration on the record backend |
//! | `put_writes` | nothing (advisory only without ordered list or CAS) |
//!
//! With an ordered list, `delete_thread` walks the namespace registry and then
//! sweeps the thread prefix on every backend that can enumerate keys.
//!
//! # Example
//!
//! ```rust
//! use checkpoint_kv::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointStore,
//!     InMemoryBackend, StoreConfig,
//! };
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> checkpoint_kv::Result<()> {
//!     let store = CheckpointStore::new(InMemoryBackend::new(), StoreConfig::default())?;
//!     let thread = CheckpointConfig::new("thread-1").with_checkpoint_ns("main");
//!
//!     let mut head = thread.clone();
//!     for id in ["ckpt-1", "ckpt-2", "ckpt-3"] {
//!         head = store
//!             .put(&head, Checkpoint::new(id, id.as_bytes().to_vec()), CheckpointMetadata::new())
//!             .await?;
//!     }
//!
//!     let latest = store.get_tuple(&thread).await?;
//!     assert_eq!(latest.checkpoint_id(), "ckpt-3");
//!
//!     let before = thread.for_checkpoint("ckpt-2");
//!     let older: Vec<_> = store.list(&thread, None, Some(&before), None).await?.try_collect().await?;
//!     assert_eq!(older.len(), 1);
//!     Ok(())
//! }
//! ```

use crate::backend::KvBackend;
use crate::capability::{Capability, OperationSupport, StoreCapabilities};
use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointRecord, CheckpointTuple,
    MetadataFilter, PendingWriteEntry, ThreadNamespace, DEFAULT_NAMESPACE,
};
use crate::config::{StoreConfig, SupersededWrites};
use crate::deadline::{with_deadline, Deadline};
use crate::error::{CheckpointError, Result};
use crate::index::OrderingIndex;
use crate::keys::KeyCodec;
use crate::observe::{StoreObserver, TracingObserver};
use crate::records::{write_failed, RecordStore};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::{CheckpointSaver, CheckpointStream};
use crate::writes::{PendingWritesBuffer, WriteConsistency, WriteReceipt, WriteStrategy};
use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at re-locating a `before` cursor that moved during a listing
const CURSOR_ATTEMPTS: usize = 3;

/// Extra index entries read past a cursor to absorb concurrent prepends
const CURSOR_SLACK: usize = 16;

/// Thread-scoped, versioned checkpoint store
#[derive(Clone)]
pub struct CheckpointStore<S = JsonSerializer> {
    config: StoreConfig,
    codec: KeyCodec,
    record_backend: Arc<dyn KvBackend>,
    index_backend: Arc<dyn KvBackend>,
    serializer: S,
    records: RecordStore<S>,
    index: OrderingIndex,
    writes: PendingWritesBuffer<S>,
    observer: Arc<dyn StoreObserver>,
}

impl CheckpointStore<JsonSerializer> {
    /// Store with records and index on one backend
    pub fn new<B: KvBackend + 'static>(backend: B, config: StoreConfig) -> Result<Self> {
        Self::from_shared(Arc::new(backend), config)
    }

    pub fn from_shared(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Result<Self> {
        Self::assemble(
            config,
            Arc::clone(&backend),
            backend,
            JsonSerializer,
            Arc::new(TracingObserver),
        )
    }
}

impl<S: SerializerProtocol + Clone + 'static> CheckpointStore<S> {
    fn assemble(
        config: StoreConfig,
        record_backend: Arc<dyn KvBackend>,
        index_backend: Arc<dyn KvBackend>,
        serializer: S,
        observer: Arc<dyn StoreObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let max_key_length = config
            .max_key_length
            .unwrap_or_else(|| record_backend.max_key_length().min(index_backend.max_key_length()));
        let codec = KeyCodec::new(config.key_prefix.clone(), max_key_length)?;
        let ttl = config.record_ttl();

        let records = RecordStore::new(
            Arc::clone(&record_backend),
            codec.clone(),
            serializer.clone(),
            ttl,
            config.read_retry.clone(),
        );
        let index = OrderingIndex::new(
            Arc::clone(&index_backend),
            codec.clone(),
            ttl,
            config.read_retry.clone(),
            config.index_scan_page,
        );
        let writes = PendingWritesBuffer::new(
            Arc::clone(&record_backend),
            codec.clone(),
            serializer.clone(),
            ttl,
            config.read_retry.clone(),
            config.cas_retry.clone(),
        );

        info!(
            record_backend = record_backend.name(),
            index_backend = index_backend.name(),
            write_strategy = ?writes.strategy(),
            "checkpoint store assembled"
        );

        Ok(Self {
            config,
            codec,
            record_backend,
            index_backend,
            serializer,
            records,
            index,
            writes,
            observer,
        })
    }

    /// Keep the ordering index and namespace registry on a separate backend
    pub fn with_index_backend<B: KvBackend + 'static>(self, backend: B) -> Result<Self> {
        self.with_shared_index_backend(Arc::new(backend))
    }

    pub fn with_shared_index_backend(self, backend: Arc<dyn KvBackend>) -> Result<Self> {
        Self::assemble(self.config, self.record_backend, backend, self.serializer, self.observer)
    }

    pub fn with_serializer<T: SerializerProtocol + Clone + 'static>(self, serializer: T) -> Result<CheckpointStore<T>> {
        CheckpointStore::assemble(
            self.config,
            self.record_backend,
            self.index_backend,
            serializer,
            self.observer,
        )
    }

    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.codec
    }

    fn shares_backend(&self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.record_backend) as *const (),
            Arc::as_ptr(&self.index_backend) as *const (),
        )
    }

    fn atomic_put(&self) -> bool {
        self.shares_backend()
            && self
                .record_backend
                .capabilities()
                .supports(Capability::MultiKeyAtomicity)
    }

    fn deadline(&self, requested: Option<Deadline>) -> Option<Deadline> {
        Deadline::earliest(requested, self.config.operation_timeout().map(Deadline::after))
    }

    fn report(&self) -> StoreCapabilities {
        let record_profile = self.record_backend.capabilities();
        let index_profile = self.index_backend.capabilities();
        let ordered = index_profile.supports(Capability::OrderedList);

        let put = if !ordered {
            OperationSupport::Relaxed {
                reason: "no ordering index; records are reachable by id only".to_string(),
            }
        } else if self.atomic_put() {
            OperationSupport::Exact
        } else {
            OperationSupport::Relaxed {
                reason: "record and index are written separately; a failed index append leaves an orphan record until TTL"
                    .to_string(),
            }
        };

        let history = if ordered {
            OperationSupport::Exact
        } else {
            OperationSupport::Unsupported {
                missing: vec![Capability::OrderedList],
            }
        };

        let delete_thread = if ordered || record_profile.supports(Capability::KeyEnumeration) {
            OperationSupport::Exact
        } else {
            OperationSupport::Unsupported {
                missing: vec![Capability::OrderedList, Capability::KeyEnumeration],
            }
        };

        let put_writes = match self.writes.strategy().consistency() {
            WriteConsistency::Atomic => OperationSupport::Exact,
            WriteConsistency::Advisory => OperationSupport::Relaxed {
                reason: "no ordered list or compare-and-swap; concurrent appends may be lost".to_string(),
            },
        };

        StoreCapabilities {
            record_backend: record_profile,
            index_backend: index_profile,
            put,
            get_by_id: OperationSupport::Exact,
            get_latest: history.clone(),
            list: history,
            delete_thread,
            put_writes,
        }
    }

    async fn put_record(&self, ns: &ThreadNamespace, record: CheckpointRecord) -> Result<CheckpointConfig> {
        let checkpoint_id = record.checkpoint_id.clone();

        let indexed = if !self.index.is_available() {
            self.records.put(ns, &record).await?;
            false
        } else if self.atomic_put() {
            let ops = vec![
                self.records.put_op(ns, &record)?,
                self.index.prepend_op(ns, &checkpoint_id)?,
                self.index.register_op(ns)?,
            ];
            let key = self.records.key(ns, &checkpoint_id)?;
            self.record_backend
                .transaction(ops)
                .await
                .map_err(|e| write_failed(&key, e))?;
            true
        } else {
            // Registry first: an index never exists without its registry entry.
            self.index.register_namespace(ns).await?;
            self.records.put(ns, &record).await?;
            match self.index.prepend(ns, &checkpoint_id).await {
                Ok(_) => true,
                Err(e) => {
                    self.observer.on_orphan_record(ns, &checkpoint_id, &e);
                    false
                }
            }
        };

        if self.config.superseded_writes == SupersededWrites::Discard && indexed {
            if let Some(parent) = &record.parent_checkpoint_id {
                if let Err(e) = self.writes.delete(ns, parent).await {
                    warn!(parent_checkpoint_id = %parent, error = %e, "failed to discard superseded writes");
                }
            }
        }

        debug!(checkpoint_id = %checkpoint_id, indexed, "checkpoint stored");
        Ok(CheckpointConfig::from(ns).for_checkpoint(checkpoint_id))
    }

    async fn load_tuple(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<Option<CheckpointTuple>> {
        let (record, writes) = futures::try_join!(
            self.records.get(ns, checkpoint_id),
            self.writes.read_writes(ns, checkpoint_id)
        )?;
        Ok(record.map(|record| CheckpointTuple::new(ns, record, writes)))
    }

    async fn lookup(&self, config: &CheckpointConfig) -> Result<CheckpointTuple> {
        let ns = config.thread_namespace();
        match &config.checkpoint_id {
            Some(checkpoint_id) => self
                .load_tuple(&ns, checkpoint_id)
                .await?
                .ok_or_else(|| CheckpointError::NotFound(format!("{}@{}", ns, checkpoint_id))),
            None => {
                if !self.index.is_available() {
                    return Err(CheckpointError::LatestLookupUnsupported {
                        missing: Capability::OrderedList,
                    });
                }
                let latest = self
                    .index
                    .latest(&ns)
                    .await?
                    .ok_or_else(|| CheckpointError::NotFound(format!("no checkpoints in {}", ns)))?;
                match self.load_tuple(&ns, &latest).await? {
                    Some(tuple) => Ok(tuple),
                    None => {
                        self.observer.on_missing_record(&ns, &latest);
                        Err(CheckpointError::NotFound(format!("{}@{} (record expired)", ns, latest)))
                    }
                }
            }
        }
    }

    /// Ids to list, newest first, resolved up front
    async fn select_ids(
        &self,
        ns: &ThreadNamespace,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointId>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let Some(cursor) = cursor else {
            let end = limit.map_or(usize::MAX, |n| n - 1);
            return self.index.range_newest_first(ns, 0, end).await;
        };

        let mut slack = CURSOR_SLACK;
        let mut shortfall = None;
        for attempt in 0..CURSOR_ATTEMPTS {
            let rank = self
                .index
                .index_of(ns, cursor)
                .await?
                .ok_or_else(|| CheckpointError::CursorNotFound(cursor.to_string()))?;
            let end = limit.map_or(usize::MAX, |n| rank.saturating_add(n).saturating_add(slack));
            let window = self.index.range_newest_first(ns, rank, end).await?;
            let window_full = end != usize::MAX && window.len() == end - rank + 1;

            let Some(position) = window.iter().position(|id| id == cursor) else {
                debug!(cursor, attempt, "cursor moved during listing, re-resolving");
                slack = slack.saturating_mul(4);
                continue;
            };

            let mut ids: Vec<CheckpointId> = window.into_iter().skip(position + 1).collect();
            match limit {
                Some(n) if ids.len() >= n => {
                    ids.truncate(n);
                    return Ok(ids);
                }
                Some(_) if window_full => {
                    // More than `slack` prepends landed between the two reads.
                    slack = slack.saturating_mul(4);
                    shortfall = Some(ids);
                }
                _ => return Ok(ids),
            }
        }

        match shortfall {
            Some(ids) => Ok(ids),
            None => Err(CheckpointError::CursorNotFound(cursor.to_string())),
        }
    }

    async fn delete_indexed(&self, thread_id: &str) -> Result<Vec<String>> {
        let mut remaining = Vec::new();
        let mut namespaces = self.index.namespaces(thread_id).await?;
        if !namespaces.iter().any(|ns| ns == DEFAULT_NAMESPACE) {
            namespaces.push(DEFAULT_NAMESPACE.to_string());
        }

        for namespace in namespaces {
            let ns = ThreadNamespace::new(thread_id, namespace);
            let ids = self.index.all(&ns).await?;

            let ns = &ns;
            let deletions = ids.iter().map(|id| async move {
                let mut failed = Vec::new();
                if let Err(e) = self.records.delete(ns, id).await {
                    warn!(checkpoint_id = %id, error = %e, "record delete failed");
                    failed.push(self.records.key(ns, id));
                }
                if let Err(e) = self.writes.delete(ns, id).await {
                    warn!(checkpoint_id = %id, error = %e, "writes delete failed");
                    failed.push(self.writes.key(ns, id));
                }
                failed
            });
            let failed = join_all(deletions)
                .await
                .into_iter()
                .flatten()
                .collect::<Result<Vec<_>>>()?;

            let index_key = self.index.key(ns)?;
            if failed.is_empty() {
                if let Err(e) = self.index.remove_all(ns).await {
                    warn!(checkpoint_ns = %ns.namespace, error = %e, "index removal failed");
                    remaining.push(index_key);
                }
            } else {
                remaining.extend(failed);
                remaining.push(index_key);
            }
            debug!(checkpoint_ns = %ns.namespace, checkpoints = ids.len(), "namespace deleted");
        }

        let registry_key = self.index.namespaces_key(thread_id)?;
        if remaining.is_empty() {
            if let Err(e) = self.index.remove_namespaces(thread_id).await {
                warn!(error = %e, "namespace registry removal failed");
                remaining.push(registry_key);
            }
        } else {
            remaining.push(registry_key);
        }
        Ok(remaining)
    }

    /// Keys the registry walk missed, found by prefix scan where a backend allows it
    async fn sweep(&self, thread_id: &str) -> Result<Vec<String>> {
        let mut remaining = Vec::new();
        if self.record_backend.capabilities().supports(Capability::KeyEnumeration) {
            remaining.extend(self.delete_scanned(&self.record_backend, thread_id).await?);
        }
        if !self.shares_backend() && self.index_backend.capabilities().supports(Capability::KeyEnumeration) {
            remaining.extend(self.delete_scanned(&self.index_backend, thread_id).await?);
        }
        Ok(remaining)
    }

    async fn delete_scanned(&self, backend: &Arc<dyn KvBackend>, thread_id: &str) -> Result<Vec<String>> {
        let prefix = self.codec.thread_prefix(thread_id);
        let keys = backend.scan_prefix(&prefix).await?;
        if !keys.is_empty() {
            debug!(backend = backend.name(), keys = keys.len(), "deleting keys by prefix scan");
        }
        let results = join_all(keys.iter().map(|key| backend.delete(key))).await;

        Ok(keys
            .into_iter()
            .zip(results)
            .filter_map(|(key, result)| match result {
                Ok(_) => None,
                Err(e) => {
                    warn!(key = %key, error = %e, "delete failed");
                    Some(key)
                }
            })
            .collect())
    }
}

#[async_trait]
impl<S: SerializerProtocol + Clone + 'static> CheckpointSaver for CheckpointStore<S> {
    fn capabilities(&self) -> StoreCapabilities {
        self.report()
    }

    #[tracing::instrument(skip(self, checkpoint, metadata), fields(thread_id = %config.thread_id, checkpoint_ns = %config.checkpoint_ns, checkpoint_id = %checkpoint.id))]
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        if checkpoint.id.is_empty() {
            return Err(CheckpointError::Invalid("checkpoint id must not be empty".to_string()));
        }
        let ns = config.thread_namespace();
        let record = CheckpointRecord::new(checkpoint, metadata, config.checkpoint_id.clone());
        with_deadline(self.deadline(config.deadline), "put", self.put_record(&ns, record)).await
    }

    #[tracing::instrument(skip(self), fields(thread_id = %config.thread_id, checkpoint_ns = %config.checkpoint_ns))]
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<CheckpointTuple> {
        with_deadline(self.deadline(config.deadline), "get_tuple", self.lookup(config)).await
    }

    #[tracing::instrument(skip(self, filter), fields(thread_id = %config.thread_id, checkpoint_ns = %config.checkpoint_ns))]
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        if !self.index.is_available() {
            return Err(CheckpointError::ListUnsupported {
                missing: Capability::OrderedList,
            });
        }

        let ns = config.thread_namespace();
        let deadline = self.deadline(config.deadline);
        let cursor = before.and_then(|b| b.checkpoint_id.as_deref());
        let ids = with_deadline(deadline, "list", self.select_ids(&ns, cursor, limit)).await?;
        debug!(selected = ids.len(), "listing checkpoints");

        let records = self.records.clone();
        let writes = self.writes.clone();
        let observer = Arc::clone(&self.observer);
        let filter = filter.filter(|f| !f.is_empty());
        let batch_size = self.config.list_batch_size;

        let stream = async_stream::try_stream! {
            for chunk in ids.chunks(batch_size) {
                let fetched = with_deadline(deadline, "list", records.get_many(&ns, chunk)).await?;

                let matching: Vec<CheckpointRecord> = chunk
                    .iter()
                    .zip(fetched)
                    .filter_map(|(id, record)| {
                        if record.is_none() {
                            observer.on_missing_record(&ns, id);
                        }
                        record
                    })
                    .filter(|record| filter.as_ref().map_or(true, |f| f.matches(&record.metadata)))
                    .collect();

                let pending = with_deadline(
                    deadline,
                    "list",
                    try_join_all(matching.iter().map(|r| writes.read_writes(&ns, &r.checkpoint_id))),
                )
                .await?;

                for (record, pending_writes) in matching.into_iter().zip(pending) {
                    yield CheckpointTuple::new(&ns, record, pending_writes);
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(skip(self, writes), fields(thread_id = %config.thread_id, checkpoint_ns = %config.checkpoint_ns, entries = writes.len()))]
    async fn put_writes(&self, config: &CheckpointConfig, writes: Vec<PendingWriteEntry>) -> Result<WriteReceipt> {
        let checkpoint_id = config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("put_writes requires a checkpoint id".to_string()))?;
        let ns = config.thread_namespace();

        let receipt = with_deadline(
            self.deadline(config.deadline),
            "put_writes",
            self.writes.append_writes(&ns, &checkpoint_id, writes),
        )
        .await?;

        if receipt.strategy == WriteStrategy::Advisory && receipt.appended > 0 {
            self.observer.on_advisory_write(&ns, &checkpoint_id, receipt.appended);
        }
        Ok(receipt)
    }

    #[tracing::instrument(skip(self), fields(thread_id = %config.thread_id))]
    async fn delete_thread(&self, config: &CheckpointConfig) -> Result<()> {
        let thread_id = config.thread_id.as_str();
        let work = async {
            if self.index.is_available() {
                match self.delete_indexed(thread_id).await {
                    Ok(remaining) if remaining.is_empty() => self.sweep(thread_id).await,
                    other => other,
                }
            } else if self
                .record_backend
                .capabilities()
                .supports(Capability::KeyEnumeration)
            {
                self.delete_scanned(&self.record_backend, thread_id).await
            } else {
                Err(CheckpointError::DeleteUnsupported {
                    missing: vec![Capability::OrderedList, Capability::KeyEnumeration],
                })
            }
        };

        let remaining = with_deadline(self.deadline(config.deadline), "delete_thread", work).await?;
        if remaining.is_empty() {
            info!("thread deleted");
            Ok(())
        } else {
            warn!(remaining = remaining.len(), "thread partially deleted");
            Err(CheckpointError::PartialDeleteFailure { remaining })
        }
    }
}

impl<S> std::fmt::Debug for CheckpointStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("record_backend", &self.record_backend.name())
            .field("index_backend", &self.index_backend.name())
            .field("prefix", &self.codec.prefix())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::BackendCapabilityProfile;
    use crate::memory::{Fault, FaultOp, InMemoryBackend};
    use crate::observe::{ObservedEvent, RecordingObserver};
    use futures::TryStreamExt;

    fn thread() -> CheckpointConfig {
        CheckpointConfig::new("t1").with_checkpoint_ns("main")
    }

    async fn put_chain(store: &CheckpointStore, ids: &[&str]) -> CheckpointConfig {
        let mut head = thread();
        for id in ids {
            head = store
                .put(&head, Checkpoint::new(*id, id.as_bytes().to_vec()), CheckpointMetadata::new())
                .await
                .unwrap();
        }
        head
    }

    async fn ids(stream: CheckpointStream) -> Vec<String> {
        let tuples: Vec<CheckpointTuple> = stream.try_collect().await.unwrap();
        tuples.iter().map(|t| t.checkpoint_id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_put_returns_new_config_with_parent() {
        let store = CheckpointStore::new(InMemoryBackend::new(), StoreConfig::default()).unwrap();
        let head = put_chain(&store, &["c1", "c2"]).await;
        assert_eq!(head.checkpoint_id.as_deref(), Some("c2"));

        let tuple = store.get_tuple(&head).await.unwrap();
        assert_eq!(tuple.record.parent_checkpoint_id.as_deref(), Some("c1"));
        assert_eq!(tuple.parent_config.unwrap().checkpoint_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_cursor_resolved_across_scan_pages() {
        let store = CheckpointStore::new(InMemoryBackend::new(), StoreConfig::default().with_index_scan_page(2))
            .unwrap();
        let names: Vec<String> = (0..40).map(|i| format!("c{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        put_chain(&store, &refs).await;

        let ids = store
            .select_ids(&thread().thread_namespace(), Some("c20"), Some(5))
            .await
            .unwrap();
        assert_eq!(ids, vec!["c19", "c18", "c17", "c16", "c15"]);
    }

    #[tokio::test]
    async fn test_orphan_record_reported_when_index_append_fails() {
        let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::full().with_multi_key_atomicity(false));
        backend.inject_fault(Fault::new(FaultOp::ListPrepend, ":i:"));
        let observer = Arc::new(RecordingObserver::new());
        let store = CheckpointStore::new(backend, StoreConfig::default())
            .unwrap()
            .with_observer(observer.clone());

        let head = store
            .put(&thread(), Checkpoint::new("c1", b"x".to_vec()), CheckpointMetadata::new())
            .await
            .unwrap();

        assert!(store.get_tuple(&head).await.is_ok());
        assert!(matches!(
            store.get_tuple(&thread()).await,
            Err(CheckpointError::NotFound(_))
        ));
        assert_eq!(
            observer.events(),
            vec![ObservedEvent::OrphanRecord {
                ns: thread().thread_namespace(),
                checkpoint_id: "c1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_atomic_put_leaves_nothing_on_failure() {
        let backend = InMemoryBackend::new();
        backend.inject_fault(Fault::new(FaultOp::Transaction, ":i:"));
        let store = CheckpointStore::new(backend.clone(), StoreConfig::default()).unwrap();

        let err = store
            .put(&thread(), Checkpoint::new("c1", b"x".to_vec()), CheckpointMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::WriteFailed(_)));
        assert_eq!(backend.key_count(), 0);
    }

    #[tokio::test]
    async fn test_superseded_writes_discarded() {
        let backend = InMemoryBackend::new();
        let store = CheckpointStore::new(
            backend,
            StoreConfig::default().with_superseded_writes(SupersededWrites::Discard),
        )
        .unwrap();

        let c1 = put_chain(&store, &["c1"]).await;
        store
            .put_writes(&c1, vec![PendingWriteEntry::new("ch", b"v".to_vec(), "task", "")])
            .await
            .unwrap();
        assert_eq!(store.get_tuple(&c1).await.unwrap().pending_writes.len(), 1);

        store
            .put(&c1, Checkpoint::new("c2", b"y".to_vec()), CheckpointMetadata::new())
            .await
            .unwrap();
        assert!(store.get_tuple(&c1).await.unwrap().pending_writes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_skipped_in_list() {
        let backend = InMemoryBackend::new();
        let store = CheckpointStore::new(backend.clone(), StoreConfig::default()).unwrap();
        put_chain(&store, &["c1", "c2", "c3"]).await;

        let key = store.key_codec().record_key(&thread().thread_namespace(), "c2").unwrap();
        backend.delete(&key).await.unwrap();

        let listed = ids(store.list(&thread(), None, None, None).await.unwrap()).await;
        assert_eq!(listed, vec!["c3", "c1"]);
    }

    #[tokio::test]
    async fn test_partial_delete_keeps_index() {
        let backend = InMemoryBackend::new();
        let store = CheckpointStore::new(backend.clone(), StoreConfig::default()).unwrap();
        put_chain(&store, &["c1", "c2"]).await;

        backend.inject_fault(Fault::new(FaultOp::Delete, ":r:main:c1").times(1));
        let err = store.delete_thread(&thread()).await.unwrap_err();
        match err {
            CheckpointError::PartialDeleteFailure { remaining } => {
                assert!(remaining.iter().any(|k| k.ends_with(":r:main:c1")));
                assert!(remaining.iter().any(|k| k.ends_with(":i:main")));
            }
            other => panic!("expected PartialDeleteFailure, got {:?}", other),
        }

        assert_eq!(ids(store.list(&thread(), None, None, None).await.unwrap()).await, vec!["c1"]);
        store.delete_thread(&thread()).await.unwrap();
        assert_eq!(backend.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_applies() {
        let backend = InMemoryBackend::new().with_latency(std::time::Duration::from_millis(100));
        let store = CheckpointStore::new(
            backend,
            StoreConfig::default().with_operation_timeout(std::time::Duration::from_millis(50)),
        )
        .unwrap();

        let err = store.get_tuple(&thread().for_checkpoint("c1")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::DeadlineExceeded { .. }));
    }
}
