//! `finalizer.toml` loading.
//!
//! Every field has a default, so a missing file (or a missing section) is
//! equivalent to an empty one. A file that exists but does not parse is a
//! configuration error.

use crate::core::error::FinalizerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "finalizer.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FinalizerConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name, relative to the store root.
    pub db_name: String,
    pub read_busy_timeout_ms: u64,
    pub write_busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_name: "finalizer.db".to_string(),
            read_busy_timeout_ms: 5_000,
            write_busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a leased task stays invisible before it is redelivered.
    pub lease_ms: u64,
    /// Transient failures beyond this many deliveries are dead-lettered.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ms: 30_000,
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 60_000,
        }
    }
}

impl QueueConfig {
    /// Delay before the next delivery after `attempts` failed deliveries.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(32);
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            poll_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Load `finalizer.toml` from the store root.
pub fn load_config(root: &Path) -> Result<FinalizerConfig, FinalizerError> {
    let path = config_path(root);
    if !path.exists() {
        // No config = defaults (not an error)
        return Ok(FinalizerConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| FinalizerError::ConfigError(format!("{}: {}", path.display(), e)))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<FinalizerConfig, FinalizerError> {
    toml::from_str(content).map_err(|e| FinalizerError::ConfigError(e.to_string()))
}
