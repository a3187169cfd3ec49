//! Cache configuration
//!
//! Settings come from an optional TOML file, then from `TIERCACHE_*`
//! environment variables (for example `TIERCACHE_MEMORY_BUDGET=67108864`).

use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "TIERCACHE";

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Size of every allocator chunk (bytes)
    pub chunk_size: usize,
    /// Encoded bytes kept resident before spilling (bytes)
    pub memory_budget: usize,
    /// Budgets below this keep nothing resident (bytes)
    pub write_through_threshold: usize,
    /// Maximum number of chunks held at once
    pub max_chunks: Option<usize>,
    /// Directory for the scratch store file
    pub scratch_dir: Option<PathBuf>,
    /// Maximum scratch store size (bytes)
    pub store_capacity: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024 * 1024, // 16MB
            memory_budget: 256 * 1024 * 1024, // 256MB
            write_through_threshold: 128 * 1024 * 1024, // 128MB
            max_chunks: None,
            scratch_dir: None,
            store_capacity: None,
        }
    }
}

impl CacheConfig {
    /// Load from `path` (if given) with environment overrides on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process one
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: CacheConfig = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        debug!(?config, "Loaded cache configuration");
        Ok(config)
    }

    /// Reject settings no cache can be built from
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.memory_budget == 0 {
            return Err(Error::Config("memory_budget must be positive".to_string()));
        }
        if self.max_chunks == Some(0) {
            return Err(Error::Config("max_chunks must be positive".to_string()));
        }
        if self.store_capacity == Some(0) {
            return Err(Error::Config("store_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// True when the budget is too small to keep anything resident
    pub fn uses_write_through(&self) -> bool {
        self.memory_budget < self.write_through_threshold
    }

    /// Directory the scratch store is created in
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tiercache"))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render configuration: {}", e)))
    }
}
