//! Backend capability declarations
//!
//! A [`BackendCapabilityProfile`] is a static statement of which primitives a
//! key-value backend provides. The checkpoint store reads it once at
//! construction and derives, per operation, whether the operation is exact,
//! relaxed, or unsupported ([`OperationSupport`]). Nothing probes the backend
//! at runtime: a profile that claims a primitive the backend lacks surfaces as
//! [`CheckpointError::BackendUnsupported`](crate::CheckpointError::BackendUnsupported).
//!
//! | Profile | Ordered list | Enumeration | Transactions | CAS |
//! |---------|:---:|:---:|:---:|:---:|
//! | [`full`](BackendCapabilityProfile::full) (Redis/Valkey-like) | ✓ | ✓ | ✓ | ✓ |
//! | [`key_value`](BackendCapabilityProfile::key_value) (Memcached-like) | | | | ✓ |
//! | [`minimal`](BackendCapabilityProfile::minimal) | | | | |

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single backend primitive family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Atomic list prepend and range reads
    OrderedList,
    /// Prefix-based key enumeration
    KeyEnumeration,
    /// All-or-nothing multi-key execution
    MultiKeyAtomicity,
    /// Compare-and-swap with version tokens
    CompareAndSwap,
    /// Data survives backend restarts
    Persistence,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OrderedList => "ordered-list",
            Capability::KeyEnumeration => "key-enumeration",
            Capability::MultiKeyAtomicity => "multi-key-atomicity",
            Capability::CompareAndSwap => "compare-and-swap",
            Capability::Persistence => "persistence",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which primitives a backend instance provides. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilityProfile {
    pub supports_ordered_list: bool,
    pub supports_key_enumeration: bool,
    pub supports_multi_key_atomicity: bool,
    pub supports_cas: bool,
    pub persistent: bool,
}

impl BackendCapabilityProfile {
    /// Every primitive, volatile
    pub const fn full() -> Self {
        Self {
            supports_ordered_list: true,
            supports_key_enumeration: true,
            supports_multi_key_atomicity: true,
            supports_cas: true,
            persistent: false,
        }
    }

    /// Plain get/set/delete plus CAS tokens
    pub const fn key_value() -> Self {
        Self {
            supports_ordered_list: false,
            supports_key_enumeration: false,
            supports_multi_key_atomicity: false,
            supports_cas: true,
            persistent: false,
        }
    }

    /// Plain get/set/delete only
    pub const fn minimal() -> Self {
        Self {
            supports_ordered_list: false,
            supports_key_enumeration: false,
            supports_multi_key_atomicity: false,
            supports_cas: false,
            persistent: false,
        }
    }

    pub const fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub const fn with_ordered_list(mut self, supported: bool) -> Self {
        self.supports_ordered_list = supported;
        self
    }

    pub const fn with_key_enumeration(mut self, supported: bool) -> Self {
        self.supports_key_enumeration = supported;
        self
    }

    pub const fn with_multi_key_atomicity(mut self, supported: bool) -> Self {
        self.supports_multi_key_atomicity = supported;
        self
    }

    pub const fn with_cas(mut self, supported: bool) -> Self {
        self.supports_cas = supported;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::OrderedList => self.supports_ordered_list,
            Capability::KeyEnumeration => self.supports_key_enumeration,
            Capability::MultiKeyAtomicity => self.supports_multi_key_atomicity,
            Capability::CompareAndSwap => self.supports_cas,
            Capability::Persistence => self.persistent,
        }
    }

    /// Fail with [`BackendUnsupported`](crate::CheckpointError::BackendUnsupported)
    /// unless `capability` is declared.
    pub fn require(&self, capability: Capability) -> crate::Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(crate::CheckpointError::BackendUnsupported(capability))
        }
    }
}

impl Default for BackendCapabilityProfile {
    fn default() -> Self {
        Self::full()
    }
}

/// How faithfully an operation can be served on the bound backend(s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "support", rename_all = "snake_case")]
pub enum OperationSupport {
    /// Full guarantees
    Exact,
    /// Available with a weaker guarantee, described by `reason`
    Relaxed { reason: String },
    /// Fails fast at call time
    Unsupported { missing: Vec<Capability> },
}

impl OperationSupport {
    pub fn is_supported(&self) -> bool {
        !matches!(self, OperationSupport::Unsupported { .. })
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, OperationSupport::Exact)
    }
}

/// Capability report for a configured store.
///
/// Returned by [`CheckpointSaver::capabilities`](crate::CheckpointSaver::capabilities)
/// so a framework can reject a backend at configuration time instead of
/// discovering unsupported operations mid-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapabilities {
    pub record_backend: BackendCapabilityProfile,
    pub index_backend: BackendCapabilityProfile,
    pub put: OperationSupport,
    pub get_by_id: OperationSupport,
    pub get_latest: OperationSupport,
    pub list: OperationSupport,
    pub delete_thread: OperationSupport,
    pub put_writes: OperationSupport,
}

impl StoreCapabilities {
    /// Latest lookup, listing and thread deletion are all available
    pub fn supports_history(&self) -> bool {
        self.get_latest.is_supported() && self.list.is_supported() && self.delete_thread.is_supported()
    }

    /// Records and their index survive a backend restart
    pub fn is_durable(&self) -> bool {
        self.record_backend.persistent && self.index_backend.persistent
    }

    /// Every operation is served with full guarantees
    pub fn is_exact(&self) -> bool {
        [
            &self.put,
            &self.get_by_id,
            &self.get_latest,
            &self.list,
            &self.delete_thread,
            &self.put_writes,
        ]
        .iter()
        .all(|s| s.is_exact())
    }
}
