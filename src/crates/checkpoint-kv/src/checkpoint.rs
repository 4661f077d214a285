//! Core checkpoint data structures
//!
//! - [`ThreadNamespace`] - one independent checkpoint timeline
//! - [`Checkpoint`] - what a caller hands to `put`
//! - [`CheckpointRecord`] - the immutable stored form (payload + metadata + parent)
//! - [`CheckpointMetadata`] - step, source and free-form fields used by list filters
//! - [`PendingWriteEntry`] - an intermediate write buffered against a checkpoint
//! - [`CheckpointConfig`] - addresses a thread/namespace and optionally one checkpoint
//! - [`CheckpointTuple`] - record, pending writes and parent reference, as returned by reads
//! - [`MetadataFilter`] - predicate applied by `list` after records are fetched
//!
//! Payloads are opaque bytes. In the stored JSON form they are base64 encoded.

use crate::deadline::Deadline;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Namespace used when the caller does not name one
pub const DEFAULT_NAMESPACE: &str = "";

/// Identifies one checkpoint timeline: `(thread_id, namespace)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadNamespace {
    pub thread_id: String,
    pub namespace: String,
}

impl ThreadNamespace {
    pub fn new(thread_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: namespace.into(),
        }
    }

    /// Timeline in the default namespace
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::new(thread_id, DEFAULT_NAMESPACE)
    }
}

impl fmt::Display for ThreadNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.thread_id)
        } else {
            write!(f, "{}/{}", self.thread_id, self.namespace)
        }
    }
}

/// Metadata source type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from an input to the workflow
    Input,
    /// Checkpoint created inside the execution loop
    Loop,
    /// Checkpoint created from a manual state update
    Update,
    /// Checkpoint created as a copy of another checkpoint
    Fork,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// The step number of the checkpoint
    /// -1 for the first "input" checkpoint
    /// 0 for the first "loop" checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// Additional custom metadata, kept apart from the typed fields so any key
    /// (including `source` or `step`) round-trips unchanged
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Look up a field by name; `source` and `step` prefer the typed fields
    /// and fall back to an extra entry of the same name
    pub fn field(&self, key: &str) -> Option<serde_json::Value> {
        let typed = match key {
            "source" => self
                .source
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok()),
            "step" => self.step.map(serde_json::Value::from),
            _ => None,
        };
        typed.or_else(|| self.extra.get(key).cloned())
    }
}

/// Checkpoint contents supplied by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Unique within the thread namespace, assigned by the caller
    pub id: CheckpointId,

    /// Opaque serialized state
    pub payload: Vec<u8>,

    /// Caller-visible logical creation time
    pub created_at_logical: i64,
}

impl Checkpoint {
    /// Logical time defaults to the current wall clock in microseconds
    pub fn new(id: impl Into<CheckpointId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            created_at_logical: Utc::now().timestamp_micros(),
        }
    }

    /// Checkpoint with a time-ordered UUIDv7 id
    pub fn with_generated_id(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Uuid::now_v7().to_string(), payload)
    }

    pub fn with_logical_time(mut self, created_at_logical: i64) -> Self {
        self.created_at_logical = created_at_logical;
        self
    }
}

/// Immutable stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: CheckpointId,

    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    #[serde(default)]
    pub metadata: CheckpointMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<CheckpointId>,

    pub created_at_logical: i64,
}

impl CheckpointRecord {
    pub fn new(
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        parent_checkpoint_id: Option<CheckpointId>,
    ) -> Self {
        Self {
            checkpoint_id: checkpoint.id,
            payload: checkpoint.payload,
            metadata,
            parent_checkpoint_id,
            created_at_logical: checkpoint.created_at_logical,
        }
    }
}

/// Intermediate side-effect write buffered against a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWriteEntry {
    pub channel: String,

    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,

    pub task_id: String,

    #[serde(default)]
    pub task_path: String,
}

impl PendingWriteEntry {
    pub fn new(
        channel: impl Into<String>,
        value: impl Into<Vec<u8>>,
        task_id: impl Into<String>,
        task_path: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            value: value.into(),
            task_id: task_id.into(),
            task_path: task_path.into(),
        }
    }
}

/// Configuration for checkpoint operations
///
/// On `put`, `checkpoint_id` names the parent; the returned config names the
/// new checkpoint. On `get_tuple`, `None` means "latest". On `list`, it is
/// ignored in favour of the explicit `before` cursor.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    /// Thread ID for grouping related checkpoints
    pub thread_id: String,

    /// Checkpoint namespace
    #[serde(default)]
    pub checkpoint_ns: String,

    /// Specific checkpoint ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    /// Caller-supplied deadline; the store default applies when unset
    #[serde(skip)]
    pub deadline: Option<Deadline>,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = checkpoint_ns.into();
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn thread_namespace(&self) -> ThreadNamespace {
        ThreadNamespace::new(self.thread_id.clone(), self.checkpoint_ns.clone())
    }

    /// Same timeline, pointing at `checkpoint_id`, without a deadline
    pub fn for_checkpoint(&self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            checkpoint_ns: self.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint_id.into()),
            deadline: None,
        }
    }
}

impl From<&ThreadNamespace> for CheckpointConfig {
    fn from(ns: &ThreadNamespace) -> Self {
        CheckpointConfig::new(ns.thread_id.clone()).with_checkpoint_ns(ns.namespace.clone())
    }
}

/// A checkpoint record together with its pending writes and parent reference
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    /// Configuration addressing this checkpoint
    pub config: CheckpointConfig,

    /// The stored record
    pub record: CheckpointRecord,

    /// Parent configuration (if any)
    pub parent_config: Option<CheckpointConfig>,

    /// Writes buffered against this checkpoint, in append order
    pub pending_writes: Vec<PendingWriteEntry>,
}

impl CheckpointTuple {
    pub fn new(ns: &ThreadNamespace, record: CheckpointRecord, pending_writes: Vec<PendingWriteEntry>) -> Self {
        let base = CheckpointConfig::from(ns);
        Self {
            config: base.for_checkpoint(record.checkpoint_id.clone()),
            parent_config: record
                .parent_checkpoint_id
                .as_ref()
                .map(|parent| base.for_checkpoint(parent.clone())),
            record,
            pending_writes,
        }
    }

    pub fn checkpoint_id(&self) -> &str {
        &self.record.checkpoint_id
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.record.metadata
    }
}

type MetadataPredicate = Arc<dyn Fn(&CheckpointMetadata) -> bool + Send + Sync>;

/// Predicate over checkpoint metadata applied by `list`
#[derive(Clone, Default)]
pub struct MetadataFilter {
    equals: HashMap<String, serde_json::Value>,
    predicate: Option<MetadataPredicate>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `metadata.field(key) == value`
    pub fn eq(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.equals.insert(key.into(), value);
        self
    }

    /// Require an arbitrary predicate (combined with equality constraints)
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CheckpointMetadata) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.predicate.is_none()
    }

    pub fn matches(&self, metadata: &CheckpointMetadata) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.field(key).as_ref() == Some(value))
            && self.predicate.as_ref().map_or(true, |p| p(metadata))
    }
}

impl From<HashMap<String, serde_json::Value>> for MetadataFilter {
    fn from(equals: HashMap<String, serde_json::Value>) -> Self {
        Self {
            equals,
            predicate: None,
        }
    }
}

impl fmt::Debug for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataFilter")
            .field("equals", &self.equals)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
