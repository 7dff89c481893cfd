//! Log line formats

use crate::logging::destinations::LogEntry;
use serde_json::Value;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    /// `{"timestamp":"...","level":"INFO","target":"...","message":"..."}`
    Json,
    /// `2025-07-17 10:30:00.000 INFO  [strata_core::migration::runner] Applied 1_init`
    Human,
    /// `timestamp=... level=INFO target=... message="Applied 1_init"`
    Logfmt,
    /// Template with `{timestamp}`, `{level}`, `{target}`, `{message}` and field placeholders
    Custom(String),
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "human" | "text" | "pretty" => Ok(LogFormat::Human),
            "logfmt" => Ok(LogFormat::Logfmt),
            _ if s.contains("{message}") => Ok(LogFormat::Custom(s.to_string())),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl LogFormat {
    pub fn format_entry(&self, entry: &LogEntry) -> String {
        match self {
            LogFormat::Json => format_json(entry),
            LogFormat::Human => format_human(entry),
            LogFormat::Logfmt => format_logfmt(entry),
            LogFormat::Custom(template) => format_custom(entry, template),
        }
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_json(entry: &LogEntry) -> String {
    let mut json = serde_json::Map::new();
    json.insert("timestamp".into(), Value::String(entry.timestamp.to_rfc3339()));
    json.insert("level".into(), Value::String(entry.level_label()));
    json.insert("target".into(), Value::String(entry.target.clone()));
    json.insert("message".into(), Value::String(entry.message.clone()));
    if let Some(location) = &entry.location {
        json.insert("location".into(), Value::String(location.clone()));
    }
    for (key, value) in &entry.fields {
        json.insert(key.clone(), value.clone());
    }
    Value::Object(json).to_string()
}

fn format_human(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {:5} [{}] {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.level_label(),
        entry.target,
        entry.message
    );
    for (key, value) in &entry.fields {
        line.push_str(&format!(" {}={}", key, plain(value)));
    }
    line
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\\\""))
}

fn format_logfmt(entry: &LogEntry) -> String {
    let mut parts = vec![
        format!("timestamp={}", entry.timestamp.to_rfc3339()),
        format!("level={}", entry.level_label()),
        format!("target={}", entry.target),
        format!("message={}", quote(&entry.message)),
    ];
    if let Some(location) = &entry.location {
        parts.push(format!("location={}", location));
    }
    for (key, value) in &entry.fields {
        let rendered = match value {
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            other => quote(&plain(other)),
        };
        parts.push(format!("{}={}", key, rendered));
    }
    parts.join(" ")
}

fn format_custom(entry: &LogEntry, template: &str) -> String {
    let mut result = template
        .replace("{timestamp}", &entry.timestamp.to_rfc3339())
        .replace("{level}", &entry.level_label())
        .replace("{target}", &entry.target)
        .replace("{message}", &entry.message)
        .replace("{location}", entry.location.as_deref().unwrap_or(""));
    for (key, value) in &entry.fields {
        result = result.replace(&format!("{{{}}}", key), &plain(value));
    }
    result
}
