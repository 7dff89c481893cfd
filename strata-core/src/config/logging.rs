//! Logging configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::logging::{LogFormat, LogLevel, LoggerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Env: STRATA_LOG_LEVEL
    pub level: String,
    /// `human`, `json`, `logfmt` or a template containing `{message}`
    /// Env: STRATA_LOG_FORMAT
    pub format: String,
    /// Optional file that receives a copy of every entry
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "human".to_string(), file: None }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(level) = env::var("STRATA_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("STRATA_LOG_FORMAT") {
            self.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.to_logger_config().map(|_| ())
    }

    /// Logger setup described by this section
    pub fn to_logger_config(&self) -> Result<LoggerConfig> {
        let level: LogLevel = self.level.parse().map_err(|e| anyhow!("logging.level: {}", e))?;
        let format: LogFormat =
            self.format.parse().map_err(|e| anyhow!("logging.format: {}", e))?;

        let mut config = LoggerConfig::default()
            .with_level(level)
            .with_format(format)
            .with_context_field("service", "strata");
        if let Some(file) = &self.file {
            config = config.with_file_output(file);
        }
        Ok(config)
    }
}
