//! Tracing initialisation
//!
//! Structured logging for the kiosk built on `tracing` and `tracing-subscriber`:
//! - Terminal output at debug level when `show_log` is set
//! - Otherwise an appended daily file `{log_dir}/{YYYYMMDD}_log.log` at the configured level
//! - Pretty, compact or JSON formatting
//! - `RUST_LOG` overrides the configured level
//!
//! # Example
//! ```no_run
//! use meal_kiosk::{config::KioskConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KioskConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("Kiosk started");
//! # Ok(())
//! # }
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::KioskConfig;
use crate::error::{AppResult, KioskError};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Standard error
    Terminal,
    /// Append to `{dir}/{YYYYMMDD}_log.log`
    DailyFile(PathBuf),
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Output destination
    pub sink: LogSink,
    /// Whether to include thread names (sensor threads are named)
    pub with_thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            sink: LogSink::Terminal,
            with_thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from the kiosk configuration
    ///
    /// `show_log` forces terminal output at debug level, matching how the
    /// kiosk is run during maintenance.
    pub fn from_kiosk_config(config: &KioskConfig) -> AppResult<Self> {
        let app = &config.application;
        let format = parse_format(&app.log_format)?;
        if app.show_log {
            Ok(Self {
                level: Level::DEBUG,
                format,
                sink: LogSink::Terminal,
                ..Default::default()
            })
        } else {
            Ok(Self {
                level: parse_log_level(&app.log_level)?,
                format,
                sink: LogSink::DailyFile(app.log_dir.clone()),
                ..Default::default()
            })
        }
    }

    /// Create logging config with a custom level, logging to the terminal
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set output destination
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }
}

/// Initialize tracing from the kiosk configuration
pub fn init_from_config(config: &KioskConfig) -> AppResult<()> {
    init(LoggingConfig::from_kiosk_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which keeps tests and embedders from tripping over each other.
pub fn init(config: LoggingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let (writer, ansi) = sink_writer(&config.sink)?;

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(KioskError::Configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Name of today's log file, e.g. `20240131_log.log`.
pub fn daily_log_file_name(date: chrono::NaiveDate) -> String {
    format!("{}_log.log", date.format("%Y%m%d"))
}

/// Writer for the sink and whether it should carry ANSI colours.
///
/// The daily file is opened once in append mode and shared behind a mutex,
/// which `tracing-subscriber` accepts as a `MakeWriter` directly.
fn sink_writer(sink: &LogSink) -> AppResult<(BoxMakeWriter, bool)> {
    match sink {
        LogSink::Terminal => Ok((BoxMakeWriter::new(std::io::stderr), true)),
        LogSink::DailyFile(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(daily_log_file_name(chrono::Local::now().date_naive()));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Ok((BoxMakeWriter::new(Mutex::new(file)), false))
        }
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(KioskError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn parse_format(format: &str) -> AppResult<OutputFormat> {
    match format {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        other => Err(KioskError::Configuration(format!(
            "Invalid log format '{}'",
            other
        ))),
    }
}
