//! # Logging Utilities
//!
//! Logging infrastructure for sonde using `tracing`.
//!
//! - Pretty output for development, JSON for machine consumption
//! - Level filtering through `RUST_LOG`
//! - Optional daily-rolled log file next to the console output
//! - The [`emit`] sink for callers that only have a category name
//!
//! Console logs go to stderr so that reports printed on stdout stay clean.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sonde_utils::init_logging;
//!
//! // Keep the guard alive for as long as file logging should keep flushing.
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!(pid = 42, "checked process ready");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=sonde_core=trace`)
//! - `SONDE_LOG_FORMAT`: `pretty` (default) or `json`
//! - `SONDE_LOG_FILE`: optional path of an additional log file

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const ENV_LOG_FORMAT: &str = "SONDE_LOG_FORMAT";
/// Environment variable naming an additional log file.
pub const ENV_LOG_FILE: &str = "SONDE_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Default
    Info,
    Debug,
    /// Most verbose
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Keeps the background file writer alive; buffered lines are flushed on drop.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug)]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// - `RUST_LOG`: level filter, `info` when unset
/// - `SONDE_LOG_FORMAT`: `pretty` or `json`
/// - `SONDE_LOG_FILE`: optional log file
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `SONDE_LOG_FORMAT` names an unknown format
/// - The log file directory cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(ENV_LOG_FORMAT) {
        Ok(value) => LogFormat::from_str(&value).map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::Pretty,
    };

    // Any valid RUST_LOG directive is used as is; otherwise fall back to info.
    let directives = env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| Level::INFO.to_string());

    let log_file = env::var(ENV_LOG_FILE).ok().map(PathBuf::from);
    install(format, &directives, log_file.as_deref())
}

/// Initialize logging with an explicit level and format
///
/// `RUST_LOG` is ignored; `SONDE_LOG_FILE` is still honoured.
///
/// ```rust,no_run
/// use sonde_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Json).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let directives = Level::from(level).to_string();
    let log_file = env::var(ENV_LOG_FILE).ok().map(PathBuf::from);
    install(format, &directives, log_file.as_deref())
}

/// Every layer gets its own filter built from the same `directives`.
fn install(format: LogFormat, directives: &str, log_file: Option<&Path>) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![layer(format, io::stderr, true, EnvFilter::new(directives))];
    let mut guard = None;

    if let Some(path) = log_file {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory)?;
        let file_name = path.file_name().unwrap_or_default();
        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        // No ANSI in files
        layers.push(layer(format, writer, false, EnvFilter::new(directives)));
        guard = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|error| LoggingError::InitializationFailed(error.to_string()))?;
    Ok(LoggingGuard { _file: guard })
}

fn layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => base.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Log `message` at `level` with a `category` field.
///
/// For code that names its log source with a dotted category string instead
/// of a Rust module path:
///
/// ```rust
/// use sonde_utils::{LogLevel, emit};
///
/// emit("mc.explore", LogLevel::Debug, "state 12 already visited");
/// ```
pub fn emit(category: &str, level: LogLevel, message: &str)
{
    match level {
        LogLevel::Error => tracing::error!(category = category, "{message}"),
        LogLevel::Warn => tracing::warn!(category = category, "{message}"),
        LogLevel::Info => tracing::info!(category = category, "{message}"),
        LogLevel::Debug => tracing::debug!(category = category, "{message}"),
        LogLevel::Trace => tracing::trace!(category = category, "{message}"),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("Warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }
}
