//! Store configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest cache that can hold a root-to-leaf path plus a split.
pub const MIN_CACHE_CAPACITY: usize = 8;

/// How a store file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Open an existing store; writes are refused.
    ReadOnly,
    /// Open an existing store for reading and writing.
    ReadWrite,
    /// Open for reading and writing, creating the store if it is missing.
    Create,
}

/// Which replacement policy the buffer cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    Clock,
    Lru,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub mode: OpenMode,
    /// Number of pages the buffer cache aims to keep resident.
    pub cache_capacity: usize,
    pub eviction: EvictionPolicy,
    /// Whether a WAL flush fsyncs the log file.
    pub sync_on_commit: bool,
    /// Upper bound on the number of pages in the store file.
    pub max_pages: Option<u64>,
    /// WAL size that triggers a checkpoint after a commit. Zero disables it.
    pub checkpoint_wal_bytes: u64,
    /// How long `begin` waits for the active writer. `None` waits forever.
    pub writer_wait_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            mode: OpenMode::Create,
            cache_capacity: 256,
            eviction: EvictionPolicy::Clock,
            sync_on_commit: true,
            max_pages: None,
            checkpoint_wal_bytes: 4 * 1024 * 1024,
            writer_wait_ms: None,
        }
    }
}

impl StoreConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity < MIN_CACHE_CAPACITY {
            return Err(Error::Config(format!(
                "cache_capacity must be at least {}, got {}",
                MIN_CACHE_CAPACITY, self.cache_capacity
            )));
        }
        // Meta page plus the initial root leaf.
        if let Some(max) = self.max_pages {
            if max < 2 {
                return Err(Error::Config(format!(
                    "max_pages must be at least 2, got {}",
                    max
                )));
            }
        }
        Ok(())
    }

    pub fn writer_wait(&self) -> Option<Duration> {
        self.writer_wait_ms.map(Duration::from_millis)
    }

    pub fn read_only() -> Self {
        StoreConfig {
            mode: OpenMode::ReadOnly,
            ..Default::default()
        }
    }
}
