//! Geolookup - Configuration
//!
//! Settings come from an optional JSON file; command-line flags override it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::watcher::DEFAULT_POLL_INTERVAL;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Explicit city dataset file. Absent means the embedded dataset only.
    pub source_path: Option<PathBuf>,
    /// Reload the dataset when `source_path` changes on disk
    pub watch: bool,
    /// Result cache capacity; values below 1 fall back to the default
    pub cache_capacity: i64,
    /// Result cache time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Upper bound on watcher shutdown latency, in milliseconds
    pub poll_interval_ms: u64,
    /// Address the lookup server binds to
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_path: None,
            watch: false,
            cache_capacity: DEFAULT_CAPACITY as i64,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            listen: "127.0.0.1:8089".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Cache capacity with values below 1 clamped to the default
    pub fn effective_cache_capacity(&self) -> NonZeroUsize {
        usize::try_from(self.cache_capacity)
            .ok()
            .and_then(NonZeroUsize::new)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
