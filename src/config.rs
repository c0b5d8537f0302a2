//! Configuration for a Pilum retrieval service.
//!
//! Every section has serde defaults, so a JSON file only needs the values it
//! overrides:
//!
//! ```
//! use pilum::config::PilumConfig;
//!
//! let config = PilumConfig::from_json_str(r#"{"fusion": {"k": 30.0}}"#).unwrap();
//! assert_eq!(config.fusion.k, 30.0);
//! assert_eq!(config.fusion.top_n, 5);
//! assert_eq!(config.cache.ttl_secs, 900);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};
use crate::hybrid::cache::CacheConfig;
use crate::hybrid::fusion::FusionConfig;
use crate::lexical::scoring::Bm25Params;

/// Per-query retrieval behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Deadline for semantic retrieval, in milliseconds.
    pub query_timeout_ms: u64,

    /// Candidates requested from each retrieval path. Raised to `top_k` when
    /// a query asks for more.
    pub candidate_depth: usize,

    /// Whether answers missing a retrieval path may be cached.
    pub cache_degraded_results: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            query_timeout_ms: 2_000,
            candidate_depth: 20,
            cache_degraded_results: false,
        }
    }
}

impl RetrievalConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Where and how often the sparse index is snapshotted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Snapshot file. Persistence is disabled when unset.
    pub snapshot_path: Option<PathBuf>,

    /// Interval between background snapshots.
    pub interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            snapshot_path: None,
            interval_secs: 60 * 60,
        }
    }
}

impl PersistenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Split `snapshot_path` into its directory and file name.
    pub fn location(&self) -> Option<(PathBuf, String)> {
        let path = self.snapshot_path.as_ref()?;
        let name = path.file_name()?.to_str()?.to_string();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some((directory, name))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilumConfig {
    pub bm25: Bm25Params,
    pub fusion: FusionConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub persistence: PersistenceConfig,
}

impl PilumConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PilumConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn with_bm25(mut self, bm25: Bm25Params) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval.query_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence.snapshot_path = Some(path.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.bm25.validate()?;
        self.fusion.validate()?;
        self.cache.validate()?;

        if self.retrieval.query_timeout_ms == 0 {
            return Err(PilumError::invalid_config(
                "retrieval.query_timeout_ms must be greater than 0",
            ));
        }
        if self.retrieval.candidate_depth == 0 {
            return Err(PilumError::invalid_config(
                "retrieval.candidate_depth must be greater than 0",
            ));
        }
        if self.persistence.interval_secs == 0 {
            return Err(PilumError::invalid_config(
                "persistence.interval_secs must be greater than 0",
            ));
        }
        if self.persistence.snapshot_path.is_some() && self.persistence.location().is_none() {
            return Err(PilumError::invalid_config(
                "persistence.snapshot_path must name a file",
            ));
        }
        Ok(())
    }
}
