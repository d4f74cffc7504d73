//! # Sonde Utilities
//!
//! Logging and configuration shared by the sonde binary and its libraries.
//!
//! - [`logging`]: `tracing` subscriber setup and the [`emit`] category sink
//! - [`config`]: checker settings read from `SONDE_*` environment variables

pub mod config;
pub mod logging;

pub use config::{CompareSetting, ConfigError, SondeConfig};
pub use logging::{LogFormat, LogLevel, LoggingError, LoggingGuard, emit, init_logging, init_logging_with_level};
// Re-export commonly used logging macros for convenience
pub use tracing::{debug, error, info, trace, warn};
