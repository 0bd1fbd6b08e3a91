use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Compression;
use crate::error::{StoreError, StoreResult};
use crate::metering::MeteringHooks;

/// Serializable knobs of a store handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Suffix appended to every object name, without the leading dot.
    pub extension: String,
    pub compression: Compression,
    /// When false, writing an existing name is a successful no-op.
    pub overwrite: bool,
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::simple()
    }
}

impl StoreOptions {
    pub fn new(extension: impl Into<String>, compression: Compression, overwrite: bool) -> Self {
        Self {
            extension: extension.into(),
            compression,
            overwrite,
            retry: RetryPolicy::default(),
        }
    }

    /// Zstd-compressed binary blocks, written once.
    pub fn dbin() -> Self {
        Self::new("dbin.zst", Compression::Zstd, false)
    }

    /// Gzip-compressed JSON lines, written once.
    pub fn jsonl() -> Self {
        Self::new("jsonl.gz", Compression::Gzip, false)
    }

    /// Raw bytes under their plain names, overwritable.
    pub fn simple() -> Self {
        Self::new("", Compression::None, true)
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_toml_str(input: &str) -> StoreResult<Self> {
        toml::from_str(input)
            .map_err(|e| StoreError::invalid_usage(format!("invalid store options: {e}")))
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self)
            .map_err(|e| StoreError::invalid_usage(format!("unserializable store options: {e}")))
    }
}

/// Compensation for backends with read-after-write lag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Wait this long after `push_local_file` and rewrite once if the object
    /// is not visible yet. Disabled when unset.
    pub push_verify_delay_ms: Option<u64>,
    /// Total attempts for `open_object` on cloud backends. Zero counts as one.
    pub read_attempts: u32,
    pub read_retry_delay_ms: u64,
    /// Download the whole object before decoding.
    pub buffered_read: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            push_verify_delay_ms: None,
            read_attempts: 1,
            read_retry_delay_ms: 500,
            buffered_read: false,
        }
    }
}

impl RetryPolicy {
    pub fn push_verify_delay(&self) -> Option<Duration> {
        self.push_verify_delay_ms.map(Duration::from_millis)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    pub fn read_attempts(&self) -> u32 {
        self.read_attempts.max(1)
    }
}

/// Full configuration snapshot of one store handle.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    pub options: StoreOptions,
    pub hooks: MeteringHooks,
}

impl StoreConfig {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            hooks: MeteringHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: MeteringHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn extension(&self) -> &str {
        &self.options.extension
    }

    pub fn compression(&self) -> Compression {
        self.options.compression
    }

    pub fn overwrite(&self) -> bool {
        self.options.overwrite
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.options.retry
    }
}

impl From<StoreOptions> for StoreConfig {
    fn from(options: StoreOptions) -> Self {
        Self::new(options)
    }
}
