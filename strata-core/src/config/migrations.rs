//! Migration engine configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Ledger file name, relative to `storage.data_dir`
    /// Default: "migrations.ledger"
    pub ledger_file: String,

    /// Catalog snapshot file name, relative to `storage.data_dir`
    /// Default: "catalog.snapshot"
    pub catalog_file: String,

    /// Run the consistency check before every `apply_up`
    /// Env: STRATA_VERIFY_BEFORE_APPLY
    /// Default: false
    pub verify_before_apply: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            ledger_file: crate::ledger::file::LEDGER_FILE_NAME.to_string(),
            catalog_file: "catalog.snapshot".to_string(),
            verify_before_apply: false,
        }
    }
}

impl MigrationsConfig {
    pub fn merge(&mut self, other: Self) {
        self.ledger_file = other.ledger_file;
        self.catalog_file = other.catalog_file;
        self.verify_before_apply = other.verify_before_apply;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(verify) = env::var("STRATA_VERIFY_BEFORE_APPLY") {
            self.verify_before_apply = verify.parse().unwrap_or(false);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger_file.trim().is_empty() || self.catalog_file.trim().is_empty() {
            bail!("migrations.ledger_file and migrations.catalog_file must be set");
        }
        if self.ledger_file == self.catalog_file {
            bail!("ledger and catalog cannot share the file '{}'", self.ledger_file);
        }
        Ok(())
    }
}
