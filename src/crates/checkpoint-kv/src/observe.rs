//! Observability hook for consistency degradations
//!
//! The store succeeds in a few situations where its guarantees are weaker
//! than usual. Each one is reported to a [`StoreObserver`] instead of being
//! swallowed.

use crate::checkpoint::ThreadNamespace;
use crate::error::CheckpointError;
use parking_lot::Mutex;
use tracing::warn;

pub trait StoreObserver: Send + Sync {
    /// A record was written but its index append failed; the record is
    /// invisible to latest lookup and listing until TTL reclaims it.
    fn on_orphan_record(&self, ns: &ThreadNamespace, checkpoint_id: &str, error: &CheckpointError);

    /// Pending writes were stored without any concurrency protection.
    fn on_advisory_write(&self, ns: &ThreadNamespace, checkpoint_id: &str, entries: usize);

    /// An indexed checkpoint had no record (expired or orphaned index entry).
    fn on_missing_record(&self, ns: &ThreadNamespace, checkpoint_id: &str) {
        let _ = (ns, checkpoint_id);
    }
}

/// Default observer: `warn!` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl StoreObserver for TracingObserver {
    fn on_orphan_record(&self, ns: &ThreadNamespace, checkpoint_id: &str, error: &CheckpointError) {
        warn!(
            thread_id = %ns.thread_id,
            checkpoint_ns = %ns.namespace,
            checkpoint_id,
            error = %error,
            "checkpoint record written but not indexed"
        );
    }

    fn on_advisory_write(&self, ns: &ThreadNamespace, checkpoint_id: &str, entries: usize) {
        warn!(
            thread_id = %ns.thread_id,
            checkpoint_ns = %ns.namespace,
            checkpoint_id,
            entries,
            "pending writes stored without concurrency protection"
        );
    }

    fn on_missing_record(&self, ns: &ThreadNamespace, checkpoint_id: &str) {
        warn!(
            thread_id = %ns.thread_id,
            checkpoint_ns = %ns.namespace,
            checkpoint_id,
            "indexed checkpoint has no record"
        );
    }
}

/// Event captured by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    OrphanRecord { ns: ThreadNamespace, checkpoint_id: String },
    AdvisoryWrite { ns: ThreadNamespace, checkpoint_id: String, entries: usize },
    MissingRecord { ns: ThreadNamespace, checkpoint_id: String },
}

/// Observer that keeps every event in memory (useful for testing)
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }
}

impl StoreObserver for RecordingObserver {
    fn on_orphan_record(&self, ns: &ThreadNamespace, checkpoint_id: &str, _error: &CheckpointError) {
        self.events.lock().push(ObservedEvent::OrphanRecord {
            ns: ns.clone(),
            checkpoint_id: checkpoint_id.to_string(),
        });
    }

    fn on_advisory_write(&self, ns: &ThreadNamespace, checkpoint_id: &str, entries: usize) {
        self.events.lock().push(ObservedEvent::AdvisoryWrite {
            ns: ns.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            entries,
        });
    }

    fn on_missing_record(&self, ns: &ThreadNamespace, checkpoint_id: &str) {
        self.events.lock().push(ObservedEvent::MissingRecord {
            ns: ns.clone(),
            checkpoint_id: checkpoint_id.to_string(),
        });
    }
}
