//! Key-value backend protocol consumed by the checkpoint store
//!
//! [`KvBackend`] is the seam to an external key-value client. The required
//! methods are plain `get` / `set` / `delete`; every other primitive is
//! optional and defaults to failing with
//! [`CheckpointError::BackendUnsupported`]. A backend declares what it really
//! implements through [`KvBackend::capabilities`], and the store never calls a
//! primitive the profile does not declare.
//!
//! | Primitive | Capability |
//! |-----------|------------|
//! | `list_prepend`, `list_range`, `list_remove_all` | [`Capability::OrderedList`] |
//! | `scan_prefix` | [`Capability::KeyEnumeration`] |
//! | `transaction` | [`Capability::MultiKeyAtomicity`] |
//! | `get_with_token`, `compare_and_swap` | [`Capability::CompareAndSwap`] |
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use checkpoint_kv::{BackendCapabilityProfile, KvBackend, Result};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct MemcachedBackend { client: memcache::Client }
//!
//! #[async_trait]
//! impl KvBackend for MemcachedBackend {
//!     fn name(&self) -> &str { "memcached" }
//!
//!     fn capabilities(&self) -> BackendCapabilityProfile {
//!         BackendCapabilityProfile::key_value()
//!     }
//!
//!     async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> { /* ... */ }
//!     async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> { /* ... */ }
//!     async fn delete(&self, key: &str) -> Result<bool> { /* ... */ }
//!     // get_with_token / compare_and_swap map onto gets / cas
//! }
//! ```

use crate::capability::{BackendCapabilityProfile, Capability};
use crate::error::{CheckpointError, Result};
use crate::keys::DEFAULT_MAX_KEY_LENGTH;
use async_trait::async_trait;
use std::time::Duration;

/// Opaque version token returned by `get_with_token`
pub type CasToken = u64;

/// One step of an all-or-nothing [`KvBackend::transaction`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    ListPrepend {
        key: String,
        values: Vec<Vec<u8>>,
        ttl: Option<Duration>,
    },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            KvOp::Set { key, .. } | KvOp::Delete { key } | KvOp::ListPrepend { key, .. } => key,
        }
    }
}

/// Per-op result of a committed transaction, in op order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOpOutcome {
    Set,
    Deleted(bool),
    /// List length after the prepend
    ListLen(usize),
}

/// Async key-value backend
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Declared primitives; fixed for the lifetime of the instance
    fn capabilities(&self) -> BackendCapabilityProfile;

    /// Longest key the backend accepts, in bytes
    fn max_key_length(&self) -> usize {
        DEFAULT_MAX_KEY_LENGTH
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Batch read; the default issues one `get` per key
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically push `values` onto the head of a list, one after another
    /// (the last value ends up at index 0). Creates the list if absent and
    /// returns its new length. `ttl` applies to the whole list key.
    async fn list_prepend(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<usize> {
        let _ = (key, values, ttl);
        Err(CheckpointError::BackendUnsupported(Capability::OrderedList))
    }

    /// Elements `start..=end` counted from the head; `end` past the tail is
    /// clamped, so `usize::MAX` reads to the end. Missing list reads as empty.
    async fn list_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<Vec<u8>>> {
        let _ = (key, start, end);
        Err(CheckpointError::BackendUnsupported(Capability::OrderedList))
    }

    /// Drop a whole list; returns whether it existed
    async fn list_remove_all(&self, key: &str) -> Result<bool> {
        let _ = key;
        Err(CheckpointError::BackendUnsupported(Capability::OrderedList))
    }

    /// Every live key starting with the literal `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let _ = prefix;
        Err(CheckpointError::BackendUnsupported(Capability::KeyEnumeration))
    }

    /// Apply every op or none of them
    async fn transaction(&self, ops: Vec<KvOp>) -> Result<Vec<KvOpOutcome>> {
        let _ = ops;
        Err(CheckpointError::BackendUnsupported(Capability::MultiKeyAtomicity))
    }

    /// Read a value with its current version token
    async fn get_with_token(&self, key: &str) -> Result<Option<(Vec<u8>, CasToken)>> {
        let _ = key;
        Err(CheckpointError::BackendUnsupported(Capability::CompareAndSwap))
    }

    /// Store `value` only if the key's token still equals `expected`
    /// (`None` = key must be absent). Returns `false` on a lost race.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<CasToken>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let _ = (key, expected, value, ttl);
        Err(CheckpointError::BackendUnsupported(Capability::CompareAndSwap))
    }
}
