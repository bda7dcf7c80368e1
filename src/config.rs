//! Configuration management with TOML support

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Top-level engine configuration
///
/// Every field has a sensible default so a bare `[engine]` section (or no
/// file at all) yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Planner settings
    #[serde(default)]
    pub planner: PlannerSettings,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Planner configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Route matching queries to pre-computed aggregate tables
    #[serde(default = "default_true")]
    pub enable_catalog_routing: bool,

    /// Prune partitions from kind and day filters
    #[serde(default = "default_true")]
    pub enable_partition_pruning: bool,
}

/// Executor configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Scan partitions in parallel when the plan is large enough
    #[serde(default = "default_true")]
    pub enable_parallel: bool,

    /// Minimum partition count before the parallel path is used
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold_partitions: usize,

    /// Upper bound on worker threads (0 = number of cores)
    #[serde(default)]
    pub max_parallelism: usize,
}

/// Result cache configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Whether the result cache is consulted at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached result sets
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Maximum total size of cached result sets, in bytes
    #[serde(default = "default_cache_bytes")]
    pub max_size_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    4
}

fn default_cache_entries() -> usize {
    1024
}

fn default_cache_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            enable_catalog_routing: true,
            enable_partition_pruning: true,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            parallel_threshold_partitions: default_parallel_threshold(),
            max_parallelism: 0,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            max_size_bytes: default_cache_bytes(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerSettings::default(),
            executor: ExecutorSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Effective worker thread count for the executor
    pub fn effective_parallelism(&self) -> usize {
        if self.executor.max_parallelism == 0 {
            num_cpus::get()
        } else {
            self.executor.max_parallelism
        }
    }
}
