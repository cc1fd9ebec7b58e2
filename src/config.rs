//! Engine configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! executor = "auto"
//! partitions = 4
//! distributed_threshold = 100000
//! metadata_queue_capacity = 1024
//! statistics_batch_size = 256
//! preview_limit = 100
//!
//! [cache]
//! default_ttl_secs = 3600
//! compress = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::DEFAULT_TTL_SECS;
use crate::pipeline::DEFAULT_BATCH_SIZE;

/// Errors raised while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which executor runs transformations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Streaming,
    Distributed,
    /// Streaming below `distributed_threshold` rows, distributed above
    #[default]
    Auto,
}

impl ExecutorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorKind::Streaming => "streaming",
            ExecutorKind::Distributed => "distributed",
            ExecutorKind::Auto => "auto",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streaming" => Ok(ExecutorKind::Streaming),
            "distributed" => Ok(ExecutorKind::Distributed),
            "auto" => Ok(ExecutorKind::Auto),
            _ => Err(format!("Unknown executor: {}", s)),
        }
    }
}

/// Content cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time to live of entries written with the default TTL
    pub default_ttl_secs: u64,
    /// Store entries zip-compressed
    pub compress: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            compress: true,
        }
    }
}

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorKind,
    /// Partition count of the distributed executor
    pub partitions: usize,
    /// Row count from which `auto` picks the distributed executor
    pub distributed_threshold: u64,
    pub cache: CacheConfig,
    /// Bound of each step metadata queue
    pub metadata_queue_capacity: usize,
    /// Rows buffered before an analyzer is fed
    pub statistics_batch_size: usize,
    /// Maximum rows collected for a preview
    pub preview_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Auto,
            partitions: 4,
            distributed_threshold: 100_000,
            cache: CacheConfig::default(),
            metadata_queue_capacity: 1024,
            statistics_batch_size: DEFAULT_BATCH_SIZE,
            preview_limit: 100,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_distributed_threshold(mut self, rows: u64) -> Self {
        self.distributed_threshold = rows;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_metadata_queue_capacity(mut self, capacity: usize) -> Self {
        self.metadata_queue_capacity = capacity;
        self
    }

    pub fn with_statistics_batch_size(mut self, size: usize) -> Self {
        self.statistics_batch_size = size;
        self
    }

    pub fn with_preview_limit(mut self, limit: u64) -> Self {
        self.preview_limit = limit;
        self
    }

    /// Executor to use for an input of `rows` rows (`None` when unknown)
    pub fn executor_for(&self, rows: Option<u64>) -> ExecutorKind {
        match self.executor {
            ExecutorKind::Auto => match rows {
                Some(n) if n >= self.distributed_threshold && self.partitions > 1 => {
                    ExecutorKind::Distributed
                }
                _ => ExecutorKind::Streaming,
            },
            kind => kind,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.partitions == 0 {
            return Err("partitions must be at least 1".to_string());
        }
        if self.metadata_queue_capacity == 0 {
            return Err("metadata_queue_capacity must be at least 1".to_string());
        }
        if self.statistics_batch_size == 0 {
            return Err("statistics_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}
