//! Storage configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the ledger and the catalog snapshot
    /// Env: STRATA_DATA_DIR
    /// Default: "./data"
    pub data_dir: String,

    /// fsync after every ledger append and snapshot write
    /// Env: STRATA_FSYNC
    /// Default: true
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: "./data".to_string(), fsync: true }
    }
}

impl StorageConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(dir) = env::var("STRATA_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Ok(fsync) = env::var("STRATA_FSYNC") {
            if let Ok(value) = fsync.parse() {
                self.fsync = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            bail!("storage.data_dir must not be empty");
        }
        Ok(())
    }
}
