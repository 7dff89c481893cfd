//! Logging for Strata
//!
//! A small `log::Log` implementation: configure it once, then use the standard
//! `log` macros everywhere. Every runner decision (step applied, reverted,
//! failed, tolerated not-found) is emitted through it.
//!
//! ```rust,no_run
//! use strata_core::logging::{LoggerConfig, LogLevel};
//!
//! let config = LoggerConfig::production()
//!     .with_file_output("./logs/migrations.log")
//!     .with_context_field("service", "strata");
//! strata_core::logging::init_logging(&config)?;
//!
//! log::info!("Starting migrations");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod destinations;
pub mod formatter;

pub use config::{LogLevel, LoggerConfig};
pub use destinations::{LogEntry, LogOutput};
pub use formatter::LogFormat;

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Strata logger as the global `log` backend
///
/// Only the first call installs anything; later calls are no-ops, so tests and
/// embedding applications may call it freely. Fails if another logger was
/// installed first or a file output cannot be opened.
pub fn init_logging(config: &LoggerConfig) -> anyhow::Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    let logger = StrataLogger::new(config.clone())?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(config.level.to_level_filter());
    let _ = INSTALLED.set(());
    Ok(())
}

enum Sink {
    Stdout,
    Stderr,
    File(Mutex<BufWriter<fs::File>>),
}

struct Writer {
    sink: Sink,
    format: LogFormat,
}

impl Writer {
    fn open(output: &LogOutput, default_format: &LogFormat) -> anyhow::Result<Self> {
        let format = output.format_override().unwrap_or(default_format).clone();
        let sink = match output {
            LogOutput::Stdout { .. } => Sink::Stdout,
            LogOutput::Stderr { .. } => Sink::Stderr,
            LogOutput::File { path, .. } => {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Sink::File(Mutex::new(BufWriter::new(file)))
            }
        };
        Ok(Self { sink, format })
    }

    fn write(&self, entry: &LogEntry) -> io::Result<()> {
        let line = self.format.format_entry(entry);
        match &self.sink {
            Sink::Stdout => writeln!(io::stdout().lock(), "{}", line),
            Sink::Stderr => writeln!(io::stderr().lock(), "{}", line),
            Sink::File(file) => match file.lock() {
                Ok(mut file) => writeln!(file, "{}", line),
                Err(_) => Ok(()),
            },
        }
    }

    fn flush(&self) -> io::Result<()> {
        match &self.sink {
            Sink::Stdout => io::stdout().flush(),
            Sink::Stderr => io::stderr().flush(),
            Sink::File(file) => match file.lock() {
                Ok(mut file) => file.flush(),
                Err(_) => Ok(()),
            },
        }
    }
}

struct StrataLogger {
    config: LoggerConfig,
    writers: Vec<Writer>,
}

impl StrataLogger {
    fn new(config: LoggerConfig) -> anyhow::Result<Self> {
        let mut writers = config
            .outputs
            .iter()
            .map(|output| Writer::open(output, &config.format))
            .collect::<anyhow::Result<Vec<_>>>()?;
        if writers.is_empty() {
            writers.push(Writer { sink: Sink::Stdout, format: config.format.clone() });
        }
        Ok(Self { config, writers })
    }
}

impl log::Log for StrataLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::from(self.config.level)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = LogEntry::from_log_record(record, &self.config);
        for writer in &self.writers {
            let _ = writer.write(&entry);
        }
    }

    fn flush(&self) {
        for writer in &self.writers {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;
    use tempfile::TempDir;

    #[test]
    fn test_file_output_receives_enabled_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("strata.log");
        let config = LoggerConfig {
            level: LogLevel::Info,
            outputs: vec![LogOutput::File {
                path: path.to_string_lossy().into_owned(),
                format: Some(LogFormat::Logfmt),
            }],
            format: LogFormat::Json,
            context_fields: Default::default(),
        };
        let logger = StrataLogger::new(config).unwrap();

        logger.log(
            &log::Record::builder()
                .args(format_args!("Applied {}", "1_init"))
                .level(log::Level::Info)
                .target("strata_core::migration::runner")
                .build(),
        );
        logger.log(
            &log::Record::builder()
                .args(format_args!("skipped"))
                .level(log::Level::Debug)
                .target("strata_core")
                .build(),
        );
        logger.flush();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("message=\"Applied 1_init\""));
    }
}
