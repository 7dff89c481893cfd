//! Logger configuration

use crate::logging::{LogFormat, LogOutput};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Logger setup: level, outputs, default format and fields stamped on every entry
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub outputs: Vec<LogOutput>,
    /// Used by every output that does not override it
    pub format: LogFormat,
    pub context_fields: BTreeMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            outputs: vec![LogOutput::Stdout { format: None }],
            format: LogFormat::Human,
            context_fields: BTreeMap::new(),
        }
    }
}

/// Log levels in order of severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        log::Level::from(self).to_level_filter()
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl LoggerConfig {
    /// JSON lines on stdout at `info`
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            outputs: vec![LogOutput::Stdout { format: None }],
            format: LogFormat::Json,
            context_fields: BTreeMap::new(),
        }
    }

    /// Human readable output at `debug`, so every schema operation is visible
    pub fn development() -> Self {
        Self { level: LogLevel::Debug, format: LogFormat::Human, ..Self::default() }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Append entries to `path` as well
    pub fn with_file_output(mut self, path: &str) -> Self {
        self.outputs.push(LogOutput::File { path: path.to_string(), format: None });
        self
    }

    pub fn with_stderr(mut self, format: Option<LogFormat>) -> Self {
        self.outputs.push(LogOutput::Stderr { format });
        self
    }

    pub fn with_context_field(mut self, key: &str, value: &str) -> Self {
        self.context_fields.insert(key.to_string(), value.to_string());
        self
    }
}
