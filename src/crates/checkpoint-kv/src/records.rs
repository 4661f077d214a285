//! Checkpoint record store
//!
//! One immutable value per `(thread, namespace, checkpoint id)`. Records are
//! written once by `put` and removed only by thread deletion or TTL.

use crate::backend::{KvBackend, KvOp};
use crate::checkpoint::{CheckpointRecord, ThreadNamespace};
use crate::error::{CheckpointError, Result};
use crate::keys::KeyCodec;
use crate::retry::{retry_read, RetryConfig};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RecordStore<S = JsonSerializer> {
    backend: Arc<dyn KvBackend>,
    codec: KeyCodec,
    serializer: S,
    ttl: Option<Duration>,
    read_retry: RetryConfig,
}

impl<S: SerializerProtocol> RecordStore<S> {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        codec: KeyCodec,
        serializer: S,
        ttl: Option<Duration>,
        read_retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            codec,
            serializer,
            ttl,
            read_retry,
        }
    }

    pub fn key(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<String> {
        self.codec.record_key(ns, checkpoint_id)
    }

    /// Transaction step storing `record`
    pub fn put_op(&self, ns: &ThreadNamespace, record: &CheckpointRecord) -> Result<KvOp> {
        Ok(KvOp::Set {
            key: self.key(ns, &record.checkpoint_id)?,
            value: self.serializer.dumps(record)?,
            ttl: self.ttl,
        })
    }

    /// Write a record. Never retried.
    pub async fn put(&self, ns: &ThreadNamespace, record: &CheckpointRecord) -> Result<()> {
        let key = self.key(ns, &record.checkpoint_id)?;
        let value = self.serializer.dumps(record)?;
        self.backend
            .set(&key, value, self.ttl)
            .await
            .map_err(|e| write_failed(&key, e))
    }

    pub async fn get(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<Option<CheckpointRecord>> {
        let key = self.key(ns, checkpoint_id)?;
        let bytes = retry_read(&self.read_retry, "record.get", || self.backend.get(&key)).await?;
        bytes.map(|b| self.decode(checkpoint_id, &b)).transpose()
    }

    /// Fetch several records of one namespace in a single backend round-trip
    pub async fn get_many(
        &self,
        ns: &ThreadNamespace,
        checkpoint_ids: &[String],
    ) -> Result<Vec<Option<CheckpointRecord>>> {
        let keys = checkpoint_ids
            .iter()
            .map(|id| self.key(ns, id))
            .collect::<Result<Vec<_>>>()?;
        let values = retry_read(&self.read_retry, "record.get_many", || self.backend.get_many(&keys)).await?;
        if values.len() != keys.len() {
            return Err(CheckpointError::backend(format!(
                "get_many returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        checkpoint_ids
            .iter()
            .zip(values)
            .map(|(id, value)| value.map(|b| self.decode(id, &b)).transpose())
            .collect()
    }

    pub async fn delete(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<bool> {
        let key = self.key(ns, checkpoint_id)?;
        self.backend.delete(&key).await
    }

    fn decode(&self, checkpoint_id: &str, bytes: &[u8]) -> Result<CheckpointRecord> {
        let record: CheckpointRecord = self.serializer.loads(bytes)?;
        // Hashed keys make a mismatch possible in principle.
        if record.checkpoint_id != checkpoint_id {
            return Err(CheckpointError::Invalid(format!(
                "record under {} holds checkpoint {}",
                checkpoint_id, record.checkpoint_id
            )));
        }
        Ok(record)
    }
}

/// Backend failures of a write become `WriteFailed`; deadline and key errors pass through
pub(crate) fn write_failed(key: &str, err: CheckpointError) -> CheckpointError {
    match err {
        CheckpointError::Backend { message, .. } => {
            CheckpointError::WriteFailed(format!("{}: {}", key, message))
        }
        CheckpointError::BackendUnsupported(capability) => {
            CheckpointError::WriteFailed(format!("{}: backend lacks `{}`", key, capability))
        }
        other => other,
    }
}
