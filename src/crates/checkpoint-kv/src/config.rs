//! Checkpoint store configuration
//!
//! Loaded from YAML, from `CHECKPOINT_KV_*` environment variables, or built
//! in code. Every loader validates before returning.

use crate::error::{CheckpointError, Result};
use crate::keys::KeyCodec;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// What `put` does with the parent checkpoint's pending writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersededWrites {
    /// Leave them for TTL or thread deletion
    #[default]
    Keep,
    /// Delete them once the child checkpoint is indexed
    Discard,
}

/// Configuration for a [`CheckpointStore`](crate::CheckpointStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// First segment of every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Key length limit; `None` uses the smallest limit of the bound backends
    #[serde(default)]
    pub max_key_length: Option<usize>,

    /// TTL applied to every key the store writes
    #[serde(default)]
    pub record_ttl_secs: Option<u64>,

    /// Default deadline for operations whose config carries none
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Records fetched per backend round-trip while listing
    #[serde(default = "default_list_batch_size")]
    pub list_batch_size: usize,

    /// Index entries read per page while resolving a cursor
    #[serde(default = "default_index_scan_page")]
    pub index_scan_page: usize,

    /// Retry policy for idempotent reads
    #[serde(default)]
    pub read_retry: RetryConfig,

    /// Retry policy for compare-and-swap appends
    #[serde(default = "default_cas_retry")]
    pub cas_retry: RetryConfig,

    #[serde(default)]
    pub superseded_writes: SupersededWrites,
}

fn default_key_prefix() -> String {
    KeyCodec::DEFAULT_PREFIX.to_string()
}

fn default_list_batch_size() -> usize {
    32
}

fn default_index_scan_page() -> usize {
    128
}

fn default_cas_retry() -> RetryConfig {
    RetryConfig::new(8).with_initial_backoff(5).with_max_backoff(200)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            max_key_length: None,
            record_ttl_secs: None,
            operation_timeout_ms: None,
            list_batch_size: default_list_batch_size(),
            index_scan_page: default_index_scan_page(),
            read_retry: RetryConfig::default(),
            cas_retry: default_cas_retry(),
            superseded_writes: SupersededWrites::default(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CheckpointError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| CheckpointError::Config(format!("Failed to parse YAML config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHECKPOINT_KV_KEY_PREFIX
    /// - CHECKPOINT_KV_MAX_KEY_LENGTH
    /// - CHECKPOINT_KV_RECORD_TTL_SECS
    /// - CHECKPOINT_KV_OPERATION_TIMEOUT_MS
    /// - CHECKPOINT_KV_LIST_BATCH_SIZE
    /// - CHECKPOINT_KV_INDEX_SCAN_PAGE
    /// - CHECKPOINT_KV_READ_MAX_RETRIES
    /// - CHECKPOINT_KV_CAS_MAX_RETRIES
    /// - CHECKPOINT_KV_SUPERSEDED_WRITES (keep/discard)
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(prefix) = env::var("CHECKPOINT_KV_KEY_PREFIX") {
            self.key_prefix = prefix;
        }

        if let Some(value) = env_parse::<usize>("CHECKPOINT_KV_MAX_KEY_LENGTH") {
            self.max_key_length = Some(value);
        }

        if let Some(value) = env_parse::<u64>("CHECKPOINT_KV_RECORD_TTL_SECS") {
            self.record_ttl_secs = Some(value);
        }

        if let Some(value) = env_parse::<u64>("CHECKPOINT_KV_OPERATION_TIMEOUT_MS") {
            self.operation_timeout_ms = Some(value);
        }

        if let Some(value) = env_parse::<usize>("CHECKPOINT_KV_LIST_BATCH_SIZE") {
            self.list_batch_size = value;
        }

        if let Some(value) = env_parse::<usize>("CHECKPOINT_KV_INDEX_SCAN_PAGE") {
            self.index_scan_page = value;
        }

        if let Some(value) = env_parse::<u32>("CHECKPOINT_KV_READ_MAX_RETRIES") {
            self.read_retry.max_retries = value;
        }

        if let Some(value) = env_parse::<u32>("CHECKPOINT_KV_CAS_MAX_RETRIES") {
            self.cas_retry.max_retries = value;
        }

        if let Ok(policy) = env::var("CHECKPOINT_KV_SUPERSEDED_WRITES") {
            if policy.eq_ignore_ascii_case("discard") {
                self.superseded_writes = SupersededWrites::Discard;
            } else if policy.eq_ignore_ascii_case("keep") {
                self.superseded_writes = SupersededWrites::Keep;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.max_key_length {
            KeyCodec::new(self.key_prefix.clone(), limit)?;
        } else {
            KeyCodec::new(self.key_prefix.clone(), usize::MAX)?;
        }

        if self.list_batch_size == 0 {
            return Err(CheckpointError::Config(
                "list_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.index_scan_page == 0 {
            return Err(CheckpointError::Config(
                "index_scan_page must be greater than 0".to_string(),
            ));
        }

        if self.record_ttl_secs == Some(0) {
            return Err(CheckpointError::Config(
                "record_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.operation_timeout_ms == Some(0) {
            return Err(CheckpointError::Config(
                "operation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        for (name, retry) in [("read_retry", &self.read_retry), ("cas_retry", &self.cas_retry)] {
            if retry.backoff_multiplier < 1.0 {
                return Err(CheckpointError::Config(format!(
                    "{}.backoff_multiplier must be at least 1.0, got {}",
                    name, retry.backoff_multiplier
                )));
            }
        }

        Ok(())
    }

    pub fn record_ttl(&self) -> Option<Duration> {
        self.record_ttl_secs.map(Duration::from_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = Some(max_key_length);
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl_secs = Some(ttl.as_secs().max(1));
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = Some((timeout.as_millis() as u64).max(1));
        self
    }

    pub fn with_list_batch_size(mut self, size: usize) -> Self {
        self.list_batch_size = size;
        self
    }

    pub fn with_index_scan_page(mut self, size: usize) -> Self {
        self.index_scan_page = size;
        self
    }

    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    pub fn with_cas_retry(mut self, retry: RetryConfig) -> Self {
        self.cas_retry = retry;
        self
    }

    pub fn with_superseded_writes(mut self, policy: SupersededWrites) -> Self {
        self.superseded_writes = policy;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.key_prefix, "ckpt");
        assert_eq!(config.superseded_writes, SupersededWrites::Keep);
        assert_eq!(config.record_ttl(), None);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new()
            .with_key_prefix("app")
            .with_max_key_length(200)
            .with_record_ttl(Duration::from_secs(3600))
            .with_operation_timeout(Duration::from_millis(250))
            .with_list_batch_size(10)
            .with_superseded_writes(SupersededWrites::Discard);

        assert_eq!(config.max_key_length, Some(200));
        assert_eq!(config.record_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(StoreConfig::new().with_list_batch_size(0).validate().is_err());
        assert!(StoreConfig::new().with_index_scan_page(0).validate().is_err());
        assert!(StoreConfig::new().with_key_prefix("a:b").validate().is_err());
        assert!(StoreConfig::new().with_key_prefix("").validate().is_err());
        assert!(StoreConfig::new().with_max_key_length(3).validate().is_err());
        assert!(StoreConfig::new()
            .with_read_retry(RetryConfig::new(1).with_multiplier(0.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "key_prefix: svc\nrecord_ttl_secs: 60\nlist_batch_size: 8\nsuperseded_writes: discard\nread_retry:\n  max_retries: 5\n"
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.key_prefix, "svc");
        assert_eq!(config.record_ttl_secs, Some(60));
        assert_eq!(config.list_batch_size, 8);
        assert_eq!(config.superseded_writes, SupersededWrites::Discard);
        assert_eq!(config.read_retry.max_retries, 5);
        assert_eq!(config.read_retry.initial_backoff_ms, 10);
        assert_eq!(config.index_scan_page, 128);
    }

    #[test]
    fn test_invalid_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "list_batch_size: 0").unwrap();
        assert!(StoreConfig::from_file(file.path()).is_err());
        assert!(StoreConfig::from_file("/nonexistent/checkpoint-kv.yaml").is_err());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("CHECKPOINT_KV_KEY_PREFIX", "envp");
        env::set_var("CHECKPOINT_KV_CAS_MAX_RETRIES", "2");
        env::set_var("CHECKPOINT_KV_SUPERSEDED_WRITES", "Discard");
        env::set_var("CHECKPOINT_KV_LIST_BATCH_SIZE", "not-a-number");

        let config = StoreConfig::from_env().unwrap();

        env::remove_var("CHECKPOINT_KV_KEY_PREFIX");
        env::remove_var("CHECKPOINT_KV_CAS_MAX_RETRIES");
        env::remove_var("CHECKPOINT_KV_SUPERSEDED_WRITES");
        env::remove_var("CHECKPOINT_KV_LIST_BATCH_SIZE");

        assert_eq!(config.key_prefix, "envp");
        assert_eq!(config.cas_retry.max_retries, 2);
        assert_eq!(config.superseded_writes, SupersededWrites::Discard);
        assert_eq!(config.list_batch_size, 32);
    }
}
