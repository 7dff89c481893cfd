//! Log outputs and the entry handed to formatters

use crate::logging::{LogFormat, LogLevel, LoggerConfig};
use std::collections::BTreeMap;

/// Where entries are written
#[derive(Clone, Debug, PartialEq)]
pub enum LogOutput {
    Stdout {
        /// Override of the default format
        format: Option<LogFormat>,
    },
    Stderr {
        format: Option<LogFormat>,
    },
    /// Append-only file, created with its parent directories
    File { path: String, format: Option<LogFormat> },
}

impl LogOutput {
    pub fn format_override(&self) -> Option<&LogFormat> {
        match self {
            LogOutput::Stdout { format }
            | LogOutput::Stderr { format }
            | LogOutput::File { format, .. } => format.as_ref(),
        }
    }
}

/// A structured log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Module path of the emitting code
    pub target: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    /// `file:line` when the record carries it
    pub location: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
            target: target.into(),
            fields: BTreeMap::new(),
            location: None,
        }
    }

    pub fn from_log_record(record: &log::Record, config: &LoggerConfig) -> Self {
        let mut entry =
            Self::new(record.level().into(), record.args().to_string(), record.target());

        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            entry.location = Some(format!("{}:{}", file, line));
        }
        for (key, value) in &config.context_fields {
            entry.fields.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        entry
    }

    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn level_label(&self) -> String {
        format!("{:?}", self.level).to_uppercase()
    }
}
