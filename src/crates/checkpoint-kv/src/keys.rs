//! Deterministic physical key layout
//!
//! Every key the store writes is built here:
//!
//! ```text
//! {prefix}:{thread}:r:{namespace}:{checkpoint_id}   checkpoint record
//! {prefix}:{thread}:w:{namespace}:{checkpoint_id}   pending-writes collection
//! {prefix}:{thread}:i:{namespace}                   ordering index
//! {prefix}:{thread}:n                               namespace registry
//! ```
//!
//! Segments are percent-encoded so the layout is a bijection on valid inputs:
//! `%`, `:`, `#`, whitespace, control bytes and non-ASCII bytes become `%XX`.
//! The thread segment always comes right after the prefix, which keeps every
//! key of a thread under [`KeyCodec::thread_prefix`] for enumeration-based
//! deletion.
//!
//! A segment that is too long is replaced by `{hint}#{sha256-hex}`, where the
//! hint is a short escaped prefix of the original text kept for diagnostics.
//! The thread segment is hashed whenever its escaped form exceeds
//! [`THREAD_SEGMENT_MAX`], independent of the rest of the key, so all keys of
//! one thread share a thread segment. Namespace and checkpoint segments are
//! hashed only when the natural key would exceed the length limit. Hashing is
//! a pure function of the input.

use crate::checkpoint::ThreadNamespace;
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest escaped thread segment stored verbatim
pub const THREAD_SEGMENT_MAX: usize = 64;

/// Longest escaped diagnostic hint kept in a hashed segment
pub const HASH_HINT_MAX: usize = 8;

/// Memcached's key-length limit, the tightest common backend limit
pub const DEFAULT_MAX_KEY_LENGTH: usize = 250;

const HASH_MARKER: char = '#';

/// Which logical structure a key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Record,
    Writes,
    Index,
    Namespaces,
}

impl KeyKind {
    fn tag(&self) -> &'static str {
        match self {
            KeyKind::Record => "r",
            KeyKind::Writes => "w",
            KeyKind::Index => "i",
            KeyKind::Namespaces => "n",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "r" => Some(KeyKind::Record),
            "w" => Some(KeyKind::Writes),
            "i" => Some(KeyKind::Index),
            "n" => Some(KeyKind::Namespaces),
            _ => None,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyKind::Record => "record",
            KeyKind::Writes => "writes",
            KeyKind::Index => "index",
            KeyKind::Namespaces => "namespaces",
        })
    }
}

/// One decoded variable-length key segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Stored verbatim (escaped)
    Plain(String),
    /// Replaced by a digest; only the diagnostic hint is recoverable
    Hashed { hint: String, digest: String },
}

impl KeySegment {
    /// Whether this segment was produced from `raw`
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            KeySegment::Plain(s) => s == raw,
            KeySegment::Hashed { digest, .. } => *digest == sha256_hex(raw),
        }
    }
}

/// Result of [`KeyCodec::decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub kind: KeyKind,
    pub thread_id: KeySegment,
    pub namespace: Option<KeySegment>,
    pub checkpoint_id: Option<KeySegment>,
}

/// Builds and parses the physical keys of one store
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    max_key_length: usize,
}

impl KeyCodec {
    pub const DEFAULT_PREFIX: &'static str = "ckpt";

    /// `prefix` must be non-empty printable ASCII without `:`, `#` or `%`.
    pub fn new(prefix: impl Into<String>, max_key_length: usize) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.bytes().any(|b| needs_escape(b)) {
            return Err(CheckpointError::Config(format!(
                "key prefix {:?} must be non-empty printable ASCII without ':', '#' or '%'",
                prefix
            )));
        }
        if max_key_length <= prefix.len() {
            return Err(CheckpointError::Config(format!(
                "max key length {} leaves no room after prefix {:?}",
                max_key_length, prefix
            )));
        }
        Ok(Self {
            prefix,
            max_key_length,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    pub fn record_key(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<String> {
        self.encode(KeyKind::Record, &ns.thread_id, &[&ns.namespace, checkpoint_id])
    }

    pub fn writes_key(&self, ns: &ThreadNamespace, checkpoint_id: &str) -> Result<String> {
        self.encode(KeyKind::Writes, &ns.thread_id, &[&ns.namespace, checkpoint_id])
    }

    pub fn index_key(&self, ns: &ThreadNamespace) -> Result<String> {
        self.encode(KeyKind::Index, &ns.thread_id, &[&ns.namespace])
    }

    pub fn namespaces_key(&self, thread_id: &str) -> Result<String> {
        self.encode(KeyKind::Namespaces, thread_id, &[])
    }

    /// Literal prefix shared by every key of `thread_id`
    pub fn thread_prefix(&self, thread_id: &str) -> String {
        format!("{}:{}:", self.prefix, thread_segment(thread_id))
    }

    fn encode(&self, kind: KeyKind, thread_id: &str, tail: &[&str]) -> Result<String> {
        let head = format!("{}:{}:{}", self.prefix, thread_segment(thread_id), kind.tag());

        let natural = join_tail(&head, tail.iter().map(|s| escape(s)));
        if natural.len() <= self.max_key_length {
            return Ok(natural);
        }

        let hashed = join_tail(&head, tail.iter().map(|s| hashed_segment(s)));
        if hashed.len() <= self.max_key_length {
            tracing::debug!(kind = %kind, natural_len = natural.len(), "substituted digest for long key segments");
            return Ok(hashed);
        }

        Err(CheckpointError::KeyTooLongAfterHashing {
            kind,
            length: hashed.len(),
            limit: self.max_key_length,
        })
    }

    /// Parse a key produced by this codec
    pub fn decode(&self, key: &str) -> Result<DecodedKey> {
        let invalid = || CheckpointError::Invalid(format!("not a checkpoint key: {}", key));

        let rest = key
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(invalid)?;
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() < 2 {
            return Err(invalid());
        }

        let kind = KeyKind::from_tag(parts[1]).ok_or_else(invalid)?;
        let expected_tail = match kind {
            KeyKind::Record | KeyKind::Writes => 2,
            KeyKind::Index => 1,
            KeyKind::Namespaces => 0,
        };
        if parts.len() != 2 + expected_tail {
            return Err(invalid());
        }

        let thread_id = decode_segment(parts[0])?;
        let namespace = parts.get(2).map(|s| decode_segment(s)).transpose()?;
        let checkpoint_id = parts.get(3).map(|s| decode_segment(s)).transpose()?;

        Ok(DecodedKey {
            kind,
            thread_id,
            namespace,
            checkpoint_id,
        })
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            prefix: Self::DEFAULT_PREFIX.to_string(),
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

fn join_tail(head: &str, segments: impl Iterator<Item = String>) -> String {
    let mut key = head.to_string();
    for segment in segments {
        key.push(':');
        key.push_str(&segment);
    }
    key
}

fn thread_segment(thread_id: &str) -> String {
    let escaped = escape(thread_id);
    if escaped.len() <= THREAD_SEGMENT_MAX {
        escaped
    } else {
        hashed_segment(thread_id)
    }
}

fn hashed_segment(raw: &str) -> String {
    let mut hint = String::new();
    for ch in raw.chars() {
        let mut buf = [0u8; 4];
        let piece = escape(ch.encode_utf8(&mut buf));
        if hint.len() + piece.len() > HASH_HINT_MAX {
            break;
        }
        hint.push_str(&piece);
    }
    format!("{}{}{}", hint, HASH_MARKER, sha256_hex(raw))
}

fn sha256_hex(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn needs_escape(b: u8) -> bool {
    !(0x21..=0x7e).contains(&b) || b == b'%' || b == b':' || b == b'#'
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if needs_escape(b) {
            out.push_str(&format!("%{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

fn unescape(segment: &str) -> Result<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment
                .get(i + 1..i + 3)
                .ok_or_else(|| CheckpointError::Invalid(format!("truncated escape in {:?}", segment)))?;
            let b = u8::from_str_radix(hex, 16)
                .map_err(|_| CheckpointError::Invalid(format!("bad escape %{} in {:?}", hex, segment)))?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| CheckpointError::Invalid(format!("segment is not UTF-8: {}", e)))
}

fn decode_segment(segment: &str) -> Result<KeySegment> {
    match segment.split_once(HASH_MARKER) {
        Some((hint, digest)) => Ok(KeySegment::Hashed {
            hint: unescape(hint)?,
            digest: digest.to_string(),
        }),
        None => Ok(KeySegment::Plain(unescape(segment)?)),
    }
}
