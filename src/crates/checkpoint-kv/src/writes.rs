//! Pending-writes buffer
//!
//! Intermediate writes of a checkpoint are appended under one writes key.
//! How appends stay safe under concurrency depends on the backend:
//!
//! | Strategy | Backend needs | Guarantee |
//! |----------|---------------|-----------|
//! | [`WriteStrategy::AtomicList`] | ordered list | one atomic multi-value prepend |
//! | [`WriteStrategy::CompareAndSwap`] | CAS | bounded optimistic retry, `WriteContention` when exhausted |
//! | [`WriteStrategy::Advisory`] | nothing | read-modify-write; concurrent appends may be lost |
//!
//! The advisory strategy never hides its weakness: every receipt it returns
//! says [`WriteConsistency::Advisory`].

use crate::backend::KvBackend;
use crate::capability::{BackendCapabilityProfile, Capability};
use crate::checkpoint::{PendingWriteEntry, ThreadNamespace};
use crate::error::{CheckpointError, Result};
use crate::keys::KeyCodec;
use crate::records::write_failed;
use crate::retry::{retry_read, RetryConfig};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    AtomicList,
    CompareAndSwap,
    Advisory,
}

impl WriteStrategy {
    /// Strongest strategy the profile allows
    pub fn for_profile(profile: &BackendCapabilityProfile) -> Self {
        if profile.supports(Capability::OrderedList) {
            WriteStrategy::AtomicList
        } else if profile.supports(Capability::CompareAndSwap) {
            WriteStrategy::CompareAndSwap
        } else {
            WriteStrategy::Advisory
        }
    }

    pub fn consistency(&self) -> WriteConsistency {
        match self {
            WriteStrategy::AtomicList | WriteStrategy::CompareAndSwap => WriteConsistency::Atomic,
            WriteStrategy::Advisory => WriteConsistency::Advisory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConsistency {
    /// No concurrent append can be lost
    Atomic,
    /// Concurrent appends may silently drop entries
    Advisory,
}

/// Outcome of an append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub consistency: WriteConsistency,
    pub strategy: WriteStrategy,
    /// Entries appended by this call
    pub appended: usize,
    /// Backend write attempts (above 1 only for CAS retries)
    pub attempts: u32,
}

#[derive(Clone)]
pub struct PendingWritesBuffer<S = JsonSerializer> {
    backend: Arc<dyn KvBackend>,
    codec: KeyCodec,
    serializer: S,
    strategy: WriteStrategy,
    ttl: Option<Duration>,
    read_retry: RetryConfig,
    cas_retry: RetryConfig,
}

impl<S: SerializerProtocol> PendingWritesBuffer<S> {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        codec: KeyCodec,
        serializer: S,
        ttl: Option<Duration>,
        read_retry: RetryConfig,
        cas_retry: RetryConfig,
    ) -> Self {
        let strategy = WriteStrategy::for_profile(&backend.capabilities());
        Self {
            backend,
            codec,
            serializer,
            strategy,
            ttl,
            read_retry,
            cas_retry,
        }
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    pub fn key(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<String> {
        self.codec.writes_key(ns, checkpoint_id)
    }

    /// Append `entries` after everything already buffered for the checkpoint
    pub async fn append_writes(
        &self,
        ns: &ThreadNamespace,
        checkpoint_id: &str,
        entries: Vec<PendingWriteEntry>,
    ) -> Result<WriteReceipt> {
        let appended = entries.len();
        if entries.is_empty() {
            return Ok(self.receipt(0, 0));
        }

        let key = self.key(ns, checkpoint_id)?;
        let attempts = match self.strategy {
            WriteStrategy::AtomicList => {
                let values = entries
                    .iter()
                    .map(|e| self.serializer.dumps(e))
                    .collect::<Result<Vec<_>>>()?;
                self.backend
                    .list_prepend(&key, values, self.ttl)
                    .await
                    .map_err(|e| write_failed(&key, e))?;
                1
            }
            WriteStrategy::CompareAndSwap => self.append_cas(&key, entries).await?,
            WriteStrategy::Advisory => {
                let mut current = self.read_blob(&key).await?;
                current.extend(entries);
                let value = self.serializer.dumps(&current)?;
                self.backend
                    .set(&key, value, self.ttl)
                    .await
                    .map_err(|e| write_failed(&key, e))?;
                1
            }
        };

        debug!(key = %key, appended, attempts, strategy = ?self.strategy, "appended pending writes");
        Ok(self.receipt(appended, attempts))
    }

    async fn append_cas(&self, key: &str, entries: Vec<PendingWriteEntry>) -> Result<u32> {
        let max_attempts = self.cas_retry.max_retries.saturating_add(1);
        for attempt in 1..=max_attempts {
            let current = retry_read(&self.read_retry, "writes.get_with_token", || {
                self.backend.get_with_token(key)
            })
            .await?;

            let (mut buffered, token) = match current {
                Some((bytes, token)) => (self.serializer.loads::<Vec<PendingWriteEntry>>(&bytes)?, Some(token)),
                None => (Vec::new(), None),
            };
            buffered.extend(entries.iter().cloned());
            let value = self.serializer.dumps(&buffered)?;

            let swapped = self
                .backend
                .compare_and_swap(key, token, value, self.ttl)
                .await
                .map_err(|e| write_failed(key, e))?;
            if swapped {
                return Ok(attempt);
            }

            if attempt < max_attempts {
                let delay = self.cas_retry.backoff_delay(attempt - 1);
                debug!(key, attempt, delay_ms = delay.as_millis() as u64, "CAS conflict, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        error!(key, attempts = max_attempts, "CAS retries exhausted");
        Err(CheckpointError::WriteContention {
            key: key.to_string(),
            attempts: max_attempts,
        })
    }

    /// Buffered entries in append order
    pub async fn read_writes(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<Vec<PendingWriteEntry>> {
        let key = self.key(ns, checkpoint_id)?;
        match self.strategy {
            WriteStrategy::AtomicList => {
                let raw = retry_read(&self.read_retry, "writes.range", || {
                    self.backend.list_range(&key, 0, usize::MAX)
                })
                .await?;
                raw.iter().rev().map(|bytes| self.serializer.loads(bytes)).collect()
            }
            WriteStrategy::CompareAndSwap | WriteStrategy::Advisory => self.read_blob(&key).await,
        }
    }

    pub async fn delete(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<bool> {
        let key = self.key(ns, checkpoint_id)?;
        self.backend.delete(&key).await
    }

    async fn read_blob(&self, key: &str) -> Result<Vec<PendingWriteEntry>> {
        let bytes = retry_read(&self.read_retry, "writes.get", || self.backend.get(key)).await?;
        match bytes {
            Some(bytes) => self.serializer.loads(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn receipt(&self, appended: usize, attempts: u32) -> WriteReceipt {
        WriteReceipt {
            consistency: self.strategy.consistency(),
            strategy: self.strategy,
            appended,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn buffer(backend: &InMemoryBackend) -> PendingWritesBuffer {
        PendingWritesBuffer::new(
            Arc::new(backend.clone()),
            KeyCodec::default(),
            JsonSerializer,
            None,
            RetryConfig::disabled(),
            RetryConfig::new(3).with_initial_backoff(1).with_jitter(false),
        )
    }

    fn entry(channel: &str, task: &str) -> PendingWriteEntry {
        PendingWriteEntry::new(channel, channel.as_bytes().to_vec(), task, "")
    }

    #[test]
    fn test_strategy_for_profile() {
        assert_eq!(
            WriteStrategy::for_profile(&BackendCapabilityProfile::full()),
            WriteStrategy::AtomicList
        );
        assert_eq!(
            WriteStrategy::for_profile(&BackendCapabilityProfile::key_value()),
            WriteStrategy::CompareAndSwap
        );
        assert_eq!(
            WriteStrategy::for_profile(&BackendCapabilityProfile::minimal()),
            WriteStrategy::Advisory
        );
    }

    async fn assert_appends_in_order(backend: InMemoryBackend, expected: WriteStrategy) {
        let buffer = buffer(&backend);
        assert_eq!(buffer.strategy(), expected);
        let ns = ThreadNamespace::new("t1", "main");

        buffer
            .append_writes(&ns, "c1", vec![entry("a", "t"), entry("b", "t")])
            .await
            .unwrap();
        let receipt = buffer.append_writes(&ns, "c1", vec![entry("c", "u")]).await.unwrap();
        assert_eq!(receipt.appended, 1);
        assert_eq!(receipt.consistency, expected.consistency());

        let channels: Vec<String> = buffer
            .read_writes(&ns, "c1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.channel)
            .collect();
        assert_eq!(channels, vec!["a", "b", "c"]);
        assert!(buffer.read_writes(&ns, "c2").await.unwrap().is_empty());

        assert!(buffer.delete(&ns, "c1").await.unwrap());
        assert!(buffer.read_writes(&ns, "c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_atomic_list_strategy() {
        assert_appends_in_order(InMemoryBackend::new(), WriteStrategy::AtomicList).await;
    }

    #[tokio::test]
    async fn test_cas_strategy() {
        assert_appends_in_order(
            InMemoryBackend::with_profile(BackendCapabilityProfile::key_value()),
            WriteStrategy::CompareAndSwap,
        )
        .await;
    }

    #[tokio::test]
    async fn test_advisory_strategy() {
        assert_appends_in_order(
            InMemoryBackend::with_profile(BackendCapabilityProfile::minimal()),
            WriteStrategy::Advisory,
        )
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cas_conflicts_are_retried() {
        let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());
        let buffer = buffer(&backend);
        backend.force_cas_conflicts(2);

        let receipt = buffer
            .append_writes(&ThreadNamespace::thread("t1"), "c1", vec![entry("a", "t")])
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cas_contention_is_bounded() {
        let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());
        let buffer = buffer(&backend);
        backend.force_cas_conflicts(10);

        let err = buffer
            .append_writes(&ThreadNamespace::thread("t1"), "c1", vec![entry("a", "t")])
            .await
            .unwrap_err();
        match err {
            CheckpointError::WriteContention { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected WriteContention, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_append_touches_nothing() {
        let backend = InMemoryBackend::new();
        let buffer = buffer(&backend);
        let receipt = buffer
            .append_writes(&ThreadNamespace::thread("t1"), "c1", Vec::new())
            .await
            .unwrap();
        assert_eq!(receipt.appended, 0);
        assert_eq!(backend.key_count(), 0);
    }
}
