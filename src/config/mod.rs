//! Engine configuration.
//!
//! Configuration is loaded with precedence: Env vars > Config file > Defaults
//!
//! # Example config file (ocn-clusters.toml)
//! ```toml
//! [retry]
//! max_retries = 5
//!
//! [large_clusters]
//! ocns = [1570562, 1041213]
//! file = "/etc/ocn-clusters/large_clusters.txt"
//!
//! [storage]
//! data_dir = "/var/lib/ocn-clusters"
//! ```

mod defaults;

pub use defaults::*;

use crate::large_clusters::LargeClusterSet;
use crate::model::Ocn;
use crate::retry::RetryPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the clustering engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transaction retry budget
    pub retry: RetryPolicy,
    /// OCNs with extreme fan-in
    pub large_clusters: LargeClusterConfig,
    /// RocksDB storage (in-memory when no data dir is set)
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Load configuration with precedence: Env > File > Defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(ConfigError::from)
    }

    /// Build the large-cluster set from the inline list and the optional file.
    pub fn large_cluster_set(&self) -> Result<LargeClusterSet, ConfigError> {
        self.large_clusters.load()
    }
}

/// Large-cluster configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeClusterConfig {
    /// OCNs listed inline
    pub ocns: Vec<u64>,
    /// Path to a file with one OCN per line
    pub file: Option<PathBuf>,
}

impl LargeClusterConfig {
    pub fn load(&self) -> Result<LargeClusterSet, ConfigError> {
        let set = LargeClusterSet::new(self.ocns.iter().copied().map(Ocn));
        if let Some(path) = &self.file {
            let from_file = LargeClusterSet::read_ocn_file(path)?;
            set.extend(from_file);
        }
        Ok(set)
    }
}

/// RocksDB storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for persistence
    pub data_dir: Option<PathBuf>,
    /// Run repair on startup
    pub repair: bool,
    /// Fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            repair: DEFAULT_REPAIR_ON_OPEN,
            sync_writes: DEFAULT_SYNC_WRITES,
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
