//! Per-namespace ordering index
//!
//! Each `(thread, namespace)` owns one backend list of checkpoint ids with
//! the newest id at rank 0. A second per-thread list, the namespace registry,
//! records which namespaces ever received an index so thread deletion can
//! enumerate them without key scanning. Every indexed put appends to the
//! registry, which keeps its TTL in step with the newest index; readers
//! deduplicate.
//!
//! Every method here needs [`Capability::OrderedList`] on the index backend.

use crate::backend::{KvBackend, KvOp};
use crate::capability::Capability;
use crate::checkpoint::{CheckpointId, ThreadNamespace};
use crate::error::{CheckpointError, Result};
use crate::keys::KeyCodec;
use crate::records::write_failed;
use crate::retry::{retry_read, RetryConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct OrderingIndex {
    backend: Arc<dyn KvBackend>,
    codec: KeyCodec,
    ttl: Option<Duration>,
    read_retry: RetryConfig,
    scan_page: usize,
}

impl OrderingIndex {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        codec: KeyCodec,
        ttl: Option<Duration>,
        read_retry: RetryConfig,
        scan_page: usize,
    ) -> Self {
        Self {
            backend,
            codec,
            ttl,
            read_retry,
            scan_page: scan_page.max(1),
        }
    }

    /// Whether the bound backend can hold an index at all
    pub fn is_available(&self) -> bool {
        self.backend.capabilities().supports(Capability::OrderedList)
    }

    pub fn key(&self, ns: &ThreadNamespace) -> Result<String> {
        self.codec.index_key(ns)
    }

    /// Transaction step inserting `checkpoint_id` at rank 0
    pub fn prepend_op(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<KvOp> {
        Ok(KvOp::ListPrepend {
            key: self.key(ns)?,
            values: vec![checkpoint_id.as_bytes().to_vec()],
            ttl: self.ttl,
        })
    }

    /// Insert `checkpoint_id` at rank 0; returns the new index length
    pub async fn prepend(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<usize> {
        let key = self.key(ns)?;
        self.backend
            .list_prepend(&key, vec![checkpoint_id.as_bytes().to_vec()], self.ttl)
            .await
            .map_err(|e| write_failed(&key, e))
    }

    /// Ids at ranks `start..=end`, newest first; `end` is clamped to the tail
    pub async fn range_newest_first(
        &self,
        ns: &ThreadNamespace,
        start: usize,
        end: usize,
    ) -> Result<Vec<CheckpointId>> {
        let key = self.key(ns)?;
        self.read_ids(&key, start, end).await
    }

    pub async fn latest(&self, ns: &ThreadNamespace) -> Result<Option<CheckpointId>> {
        Ok(self.range_newest_first(ns, 0, 0).await?.into_iter().next())
    }

    pub async fn all(&self, ns: &ThreadNamespace) -> Result<Vec<CheckpointId>> {
        self.range_newest_first(ns, 0, usize::MAX).await
    }

    /// Rank of `checkpoint_id`, scanning from the head one page at a time
    pub async fn index_of(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<Option<usize>> {
        let key = self.key(ns)?;
        let mut start = 0usize;
        loop {
            let end = start.saturating_add(self.scan_page - 1);
            let page = self.read_ids(&key, start, end).await?;
            if let Some(offset) = page.iter().position(|id| id == checkpoint_id) {
                return Ok(Some(start + offset));
            }
            if page.len() < self.scan_page {
                return Ok(None);
            }
            start = start.saturating_add(self.scan_page);
        }
    }

    pub async fn remove_all(&self, ns: &ThreadNamespace) -> Result<bool> {
        let key = self.key(ns)?;
        self.backend.list_remove_all(&key).await
    }

    /// Transaction step adding a namespace to its thread's registry
    pub fn register_op(&self, ns: &ThreadNamespace) -> Result<KvOp> {
        Ok(KvOp::ListPrepend {
            key: self.codec.namespaces_key(&ns.thread_id)?,
            values: vec![ns.namespace.as_bytes().to_vec()],
            ttl: self.ttl,
        })
    }

    /// Add a namespace to its thread's registry and refresh the registry TTL
    pub async fn register_namespace(&self, ns: &ThreadNamespace) -> Result<()> {
        let key = self.codec.namespaces_key(&ns.thread_id)?;
        self.backend
            .list_prepend(&key, vec![ns.namespace.as_bytes().to_vec()], self.ttl)
            .await
            .map_err(|e| write_failed(&key, e))?;
        debug!(thread_id = %ns.thread_id, checkpoint_ns = %ns.namespace, "registered namespace");
        Ok(())
    }

    /// Registered namespaces of a thread, deduplicated, most recent first
    pub async fn namespaces(&self, thread_id: &str) -> Result<Vec<String>> {
        let key = self.codec.namespaces_key(thread_id)?;
        let raw = self.read_ids(&key, 0, usize::MAX).await?;
        let mut seen = HashSet::new();
        Ok(raw.into_iter().filter(|ns| seen.insert(ns.clone())).collect())
    }

    pub fn namespaces_key(&self, thread_id: &str) -> Result<String> {
        self.codec.namespaces_key(thread_id)
    }

    pub async fn remove_namespaces(&self, thread_id: &str) -> Result<bool> {
        let key = self.codec.namespaces_key(thread_id)?;
        self.backend.list_remove_all(&key).await
    }

    async fn read_ids(&self, key: &str, start: usize, end: usize) -> Result<Vec<String>> {
        let raw = retry_read(&self.read_retry, "index.range", || {
            self.backend.list_range(key, start, end)
        })
        .await?;
        raw.into_iter()
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| CheckpointError::Invalid(format!("non-utf8 entry in {}: {}", key, e)))
            })
            .collect()
    }
}
