//! Error types for checkpoint operations

use crate::capability::Capability;
use crate::keys::KeyKind;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Requested checkpoint (or latest checkpoint of a thread) is absent
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// "Get latest" requires an ordered index the bound backend cannot provide
    #[error("Latest-checkpoint lookup unsupported: backend lacks the `{missing}` capability")]
    LatestLookupUnsupported { missing: Capability },

    /// History listing requires an ordered index the bound backend cannot provide
    #[error("Checkpoint listing unsupported: backend lacks the `{missing}` capability")]
    ListUnsupported { missing: Capability },

    /// Thread deletion needs either an ordered index or key enumeration
    #[error("Thread deletion unsupported: backend lacks all of {}", format_capabilities(.missing))]
    DeleteUnsupported { missing: Vec<Capability> },

    /// The `before` cursor no longer exists in the thread's ordering index
    #[error("Pagination cursor not found: {0}")]
    CursorNotFound(String),

    /// Even the digest-substituted key exceeds the backend key-length limit
    #[error("{kind} key is {length} bytes after hashing, limit is {limit}")]
    KeyTooLongAfterHashing {
        kind: KeyKind,
        length: usize,
        limit: usize,
    },

    /// The checkpoint record itself could not be written
    #[error("Checkpoint write failed: {0}")]
    WriteFailed(String),

    /// Compare-and-swap retries were exhausted on a contended key
    #[error("Write contention on {key}: gave up after {attempts} attempts")]
    WriteContention { key: String, attempts: u32 },

    /// Some keys of a thread could not be deleted
    #[error("Partial delete failure: {} key(s) remain", .remaining.len())]
    PartialDeleteFailure { remaining: Vec<String> },

    /// The caller-supplied deadline expired before the operation finished
    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    /// A backend primitive was invoked on a backend that does not provide it
    #[error("Backend does not support `{0}`")]
    BackendUnsupported(Capability),

    /// Error reported by the key-value backend
    #[error("Backend error: {message}")]
    Backend { message: String, transient: bool },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid argument or stored data
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Permanent backend failure
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: false,
        }
    }

    /// Backend failure that may succeed on retry (network, timeouts)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether an idempotent read may be retried after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { transient: true, .. })
    }

    /// Capabilities named by an unsupported-capability error
    pub fn missing_capabilities(&self) -> Vec<Capability> {
        match self {
            Self::LatestLookupUnsupported { missing }
            | Self::ListUnsupported { missing }
            | Self::BackendUnsupported(missing) => vec![*missing],
            Self::DeleteUnsupported { missing } => missing.clone(),
            _ => Vec::new(),
        }
    }
}

fn format_capabilities(caps: &[Capability]) -> String {
    caps.iter()
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(", ")
}
