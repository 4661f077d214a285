//! In-memory key-value backend for development and testing
//!
//! [`InMemoryBackend`] implements every [`KvBackend`] primitive but only
//! serves the ones its [`BackendCapabilityProfile`] declares, so the same type
//! stands in for a Redis-like store ([`BackendCapabilityProfile::full`]) or a
//! Memcached-like one ([`BackendCapabilityProfile::key_value`]).
//!
//! # Overview
//!
//! - **Thread-safe** - one `parking_lot::Mutex` over the key space, never held across `.await`
//! - **TTL** - per-key expiry on the tokio clock, evicted lazily on access
//! - **CAS** - every mutation bumps a global version counter used as the CAS token
//! - **Transactions** - validated up front, then applied under a single lock
//! - **Test hooks** - fault injection, forced CAS conflicts, artificial latency
//!
//! Clones share the same key space.
//!
//! ```rust
//! use checkpoint_kv::{BackendCapabilityProfile, InMemoryBackend, KvBackend};
//!
//! #[tokio::main]
//! async fn main() -> checkpoint_kv::Result<()> {
//!     let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());
//!     backend.set("k", b"v".to_vec(), None).await?;
//!     assert_eq!(backend.get("k").await?, Some(b"v".to_vec()));
//!     assert!(backend.list_range("k", 0, 1).await.is_err());
//!     Ok(())
//! }
//! ```

use crate::backend::{CasToken, KvBackend, KvOp, KvOpOutcome};
use crate::capability::{BackendCapabilityProfile, Capability};
use crate::error::{CheckpointError, Result};
use crate::keys::DEFAULT_MAX_KEY_LENGTH;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Backend primitive a [`Fault`] can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Get,
    Set,
    Delete,
    ListPrepend,
    ListRange,
    ListRemoveAll,
    Scan,
    Transaction,
    CompareAndSwap,
}

/// Injected failure for keys containing `key_contains`
#[derive(Debug, Clone)]
pub struct Fault {
    pub op: FaultOp,
    pub key_contains: String,
    pub transient: bool,
    /// How many more times to fire; `None` = forever
    pub remaining: Option<u32>,
}

impl Fault {
    pub fn new(op: FaultOp, key_contains: impl Into<String>) -> Self {
        Self {
            op,
            key_contains: key_contains.into(),
            transient: false,
            remaining: None,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }
}

#[derive(Debug, Clone)]
enum SlotValue {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    cas: CasToken,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<String, Slot>,
    next_cas: CasToken,
    faults: Vec<Fault>,
    cas_conflicts: u32,
}

impl State {
    fn bump(&mut self) -> CasToken {
        self.next_cas += 1;
        self.next_cas
    }

    fn live(&mut self, key: &str) -> Option<&mut Slot> {
        let now = Instant::now();
        if self.slots.get(key).map_or(false, |s| s.is_expired(now)) {
            self.slots.remove(key);
        }
        self.slots.get_mut(key)
    }

    fn fire_fault(&mut self, op: FaultOp, key: &str) -> Option<CheckpointError> {
        let index = self
            .faults
            .iter()
            .position(|f| f.op == op && key.contains(&f.key_contains))?;
        let fault = &mut self.faults[index];
        let transient = fault.transient;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }
        let message = format!("injected {:?} failure on {}", op, key);
        Some(if transient {
            CheckpointError::transient(message)
        } else {
            CheckpointError::backend(message)
        })
    }

    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let cas = self.bump();
        self.slots.insert(
            key.to_string(),
            Slot {
                value: SlotValue::Bytes(value),
                cas,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn delete(&mut self, key: &str) -> bool {
        let existed = self.live(key).is_some();
        self.slots.remove(key);
        existed
    }

    fn check_list(&mut self, key: &str) -> Result<()> {
        match self.live(key) {
            Some(Slot {
                value: SlotValue::Bytes(_),
                ..
            }) => Err(wrong_type(key)),
            _ => Ok(()),
        }
    }

    fn list_prepend(&mut self, key: &str, values: Vec<Vec<u8>>, ttl: Option<Duration>) -> Result<usize> {
        self.check_list(key)?;
        let cas = self.bump();
        let slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: SlotValue::List(VecDeque::new()),
            cas,
            expires_at: None,
        });
        slot.cas = cas;
        if let Some(ttl) = ttl {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        match &mut slot.value {
            SlotValue::List(list) => {
                for value in values {
                    list.push_front(value);
                }
                Ok(list.len())
            }
            SlotValue::Bytes(_) => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> CheckpointError {
    CheckpointError::backend(format!("wrong value type at {}", key))
}

/// In-memory [`KvBackend`] with a configurable capability profile
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    name: String,
    profile: BackendCapabilityProfile,
    max_key_length: usize,
    latency: Option<Duration>,
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    /// Backend with every primitive available
    pub fn new() -> Self {
        Self::with_profile(BackendCapabilityProfile::full())
    }

    pub fn with_profile(profile: BackendCapabilityProfile) -> Self {
        Self {
            name: "memory".to_string(),
            profile,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            latency: None,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    /// Sleep this long before every primitive
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Make the next `count` compare-and-swap calls lose their race
    pub fn force_cas_conflicts(&self, count: u32) {
        self.state.lock().cas_conflicts = count;
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn key_count(&self) -> usize {
        self.keys().len()
    }

    /// Drop every key (useful for testing)
    pub fn clear(&self) {
        self.state.lock().slots.clear();
    }

    async fn enter(&self, op: FaultOp, key: &str, capability: Option<Capability>) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(capability) = capability {
            self.profile.require(capability)?;
        }
        if key.len() > self.max_key_length {
            return Err(CheckpointError::backend(format!(
                "key of {} bytes exceeds limit {}",
                key.len(),
                self.max_key_length
            )));
        }
        match self.state.lock().fire_fault(op, key) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BackendCapabilityProfile {
        self.profile
    }

    fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter(FaultOp::Get, key, None).await?;
        let mut state = self.state.lock();
        match state.live(key) {
            None => Ok(None),
            Some(Slot {
                value: SlotValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.enter(FaultOp::Set, key, None).await?;
        self.state.lock().set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter(FaultOp::Delete, key, None).await?;
        Ok(self.state.lock().delete(key))
    }

    async fn list_prepend(&self, key: &str, values: Vec<Vec<u8>>, ttl: Option<Duration>) -> Result<usize> {
        self.enter(FaultOp::ListPrepend, key, Some(Capability::OrderedList)).await?;
        self.state.lock().list_prepend(key, values, ttl)
    }

    async fn list_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<Vec<u8>>> {
        self.enter(FaultOp::ListRange, key, Some(Capability::OrderedList)).await?;
        let mut state = self.state.lock();
        match state.live(key) {
            None => Ok(Vec::new()),
            Some(Slot {
                value: SlotValue::List(list),
                ..
            }) => {
                if start >= list.len() || start > end {
                    return Ok(Vec::new());
                }
                let end = end.min(list.len() - 1);
                Ok(list.range(start..=end).cloned().collect())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_remove_all(&self, key: &str) -> Result<bool> {
        self.enter(FaultOp::ListRemoveAll, key, Some(Capability::OrderedList)).await?;
        let mut state = self.state.lock();
        state.check_list(key)?;
        Ok(state.delete(key))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.enter(FaultOp::Scan, prefix, Some(Capability::KeyEnumeration)).await?;
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn transaction(&self, ops: Vec<KvOp>) -> Result<Vec<KvOpOutcome>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.profile.require(Capability::MultiKeyAtomicity)?;

        let mut state = self.state.lock();
        for op in &ops {
            if op.key().len() > self.max_key_length {
                return Err(CheckpointError::backend(format!("key too long: {}", op.key())));
            }
            if let Some(err) = state.fire_fault(FaultOp::Transaction, op.key()) {
                return Err(err);
            }
            if let KvOp::ListPrepend { key, .. } = op {
                state.check_list(key)?;
            }
        }

        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = match op {
                KvOp::Set { key, value, ttl } => {
                    state.set(&key, value, ttl);
                    KvOpOutcome::Set
                }
                KvOp::Delete { key } => KvOpOutcome::Deleted(state.delete(&key)),
                KvOp::ListPrepend { key, values, ttl } => {
                    KvOpOutcome::ListLen(state.list_prepend(&key, values, ttl)?)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn get_with_token(&self, key: &str) -> Result<Option<(Vec<u8>, CasToken)>> {
        self.enter(FaultOp::Get, key, Some(Capability::CompareAndSwap)).await?;
        let mut state = self.state.lock();
        match state.live(key) {
            None => Ok(None),
            Some(Slot {
                value: SlotValue::Bytes(bytes),
                cas,
                ..
            }) => Ok(Some((bytes.clone(), *cas))),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<CasToken>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.enter(FaultOp::CompareAndSwap, key, Some(Capability::CompareAndSwap)).await?;
        let mut state = self.state.lock();
        if state.cas_conflicts > 0 {
            state.cas_conflicts -= 1;
            return Ok(false);
        }
        let current = state.live(key).map(|slot| slot.cas);
        if current != expected {
            return Ok(false);
        }
        state.set(key, value, ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert_eq!(backend.key_count(), 0);
    }

    #[tokio::test]
    async fn test_list_prepend_and_range() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.list_prepend("l", vec![b"a".to_vec()], None).await.unwrap(), 1);
        assert_eq!(
            backend
                .list_prepend("l", vec![b"b".to_vec(), b"c".to_vec()], None)
                .await
                .unwrap(),
            3
        );

        let all = backend.list_range("l", 0, usize::MAX).await.unwrap();
        assert_eq!(all, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(backend.list_range("l", 1, 1).await.unwrap(), vec![b"b".to_vec()]);
        assert!(backend.list_range("l", 5, 9).await.unwrap().is_empty());
        assert!(backend.list_range("missing", 0, 9).await.unwrap().is_empty());

        assert!(backend.list_remove_all("l").await.unwrap());
        assert!(backend.list_range("l", 0, usize::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert!(backend.list_prepend("k", vec![b"x".to_vec()], None).await.is_err());
        backend.list_prepend("l", vec![b"x".to_vec()], None).await.unwrap();
        assert!(backend.get("l").await.is_err());
    }

    #[tokio::test]
    async fn test_profile_gates_primitives() {
        let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());
        let err = backend.list_prepend("l", vec![b"x".to_vec()], None).await.unwrap_err();
        assert_eq!(err.missing_capabilities(), vec![Capability::OrderedList]);
        assert!(backend.scan_prefix("").await.is_err());
        assert!(backend.transaction(Vec::new()).await.is_err());
        assert!(backend.get_with_token("k").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        backend
            .list_prepend("l", vec![b"a".to_vec()], Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.list_range("l", 0, 10).await.unwrap().is_empty());
        assert_eq!(backend.key_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let backend = InMemoryBackend::new();
        for key in ["a:1", "a:2", "b:1"] {
            backend.set(key, Vec::new(), None).await.unwrap();
        }
        assert_eq!(backend.scan_prefix("a:").await.unwrap(), vec!["a:1", "a:2"]);
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let backend = InMemoryBackend::new();
        backend.set("bytes", b"v".to_vec(), None).await.unwrap();

        let result = backend
            .transaction(vec![
                KvOp::Set {
                    key: "new".into(),
                    value: b"x".to_vec(),
                    ttl: None,
                },
                KvOp::ListPrepend {
                    key: "bytes".into(),
                    values: vec![b"y".to_vec()],
                    ttl: None,
                },
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(backend.get("new").await.unwrap(), None);

        let outcomes = backend
            .transaction(vec![
                KvOp::Set {
                    key: "new".into(),
                    value: b"x".to_vec(),
                    ttl: None,
                },
                KvOp::ListPrepend {
                    key: "list".into(),
                    values: vec![b"y".to_vec()],
                    ttl: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![KvOpOutcome::Set, KvOpOutcome::ListLen(1)]);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::key_value());

        assert!(backend.compare_and_swap("k", None, b"1".to_vec(), None).await.unwrap());
        assert!(!backend.compare_and_swap("k", None, b"2".to_vec(), None).await.unwrap());

        let (value, token) = backend.get_with_token("k").await.unwrap().unwrap();
        assert_eq!(value, b"1".to_vec());

        backend.set("k", b"other".to_vec(), None).await.unwrap();
        assert!(!backend.compare_and_swap("k", Some(token), b"3".to_vec(), None).await.unwrap());

        let (_, token) = backend.get_with_token("k").await.unwrap().unwrap();
        backend.force_cas_conflicts(1);
        assert!(!backend.compare_and_swap("k", Some(token), b"3".to_vec(), None).await.unwrap());
        assert!(backend.compare_and_swap("k", Some(token), b"3".to_vec(), None).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let backend = InMemoryBackend::new();
        backend.inject_fault(Fault::new(FaultOp::Set, "bad").transient().times(1));

        let err = backend.set("bad-key", Vec::new(), None).await.unwrap_err();
        assert!(err.is_transient());
        backend.set("bad-key", Vec::new(), None).await.unwrap();
        backend.set("good-key", Vec::new(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_max_key_length_enforced() {
        let backend = InMemoryBackend::new().with_max_key_length(8);
        assert!(backend.set("short", Vec::new(), None).await.is_ok());
        assert!(backend.set("much-too-long", Vec::new(), None).await.is_err());
    }
}
