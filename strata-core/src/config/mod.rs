//! Configuration for Strata
//!
//! Values are resolved in this order (highest priority wins):
//!
//! 1. **Environment variables** (`STRATA_*`)
//! 2. **Config file** (`strata.toml`)
//! 3. **Defaults**
//!
//! ```no_run
//! use strata_core::config::StrataConfig;
//!
//! let config = StrataConfig::load()?;
//! config.validate()?;
//! println!("ledger at {}", config.ledger_path().display());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! A complete `strata.toml`:
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! fsync = true
//!
//! [migrations]
//! ledger_file = "migrations.ledger"
//! catalog_file = "catalog.snapshot"
//! verify_before_apply = false
//!
//! [logging]
//! level = "info"
//! format = "human"
//! ```

pub mod logging;
pub mod migrations;
pub mod storage;

pub use logging::LoggingConfig;
pub use migrations::MigrationsConfig;
pub use storage::StorageConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "strata.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub storage: StorageConfig,
    pub migrations: MigrationsConfig,
    pub logging: LoggingConfig,
}

impl StrataConfig {
    /// Defaults, then `strata.toml` if present, then environment
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE_NAME)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();

        if path.exists() {
            let file_config = Self::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.merge(file_config);
        }

        config.apply_env_vars();
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.as_ref().display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Merge another config into this one (other takes priority)
    pub fn merge(&mut self, other: Self) {
        self.storage.merge(other.storage);
        self.migrations.merge(other.migrations);
        self.logging.merge(other.logging);
    }

    pub fn apply_env_vars(&mut self) {
        self.storage.apply_env_vars();
        self.migrations.apply_env_vars();
        self.logging.apply_env_vars();
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.migrations.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join(&self.migrations.ledger_file)
    }

    pub fn catalog_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join(&self.migrations.catalog_file)
    }

    /// Config pointing every file at `data_dir` (tests, embedded use)
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.storage.data_dir = data_dir.as_ref().to_string_lossy().into_owned();
        self
    }
}
