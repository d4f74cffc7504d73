//! # Checker Configuration
//!
//! Settings read from `SONDE_*` environment variables. There are no config
//! files; the `sonde` CLI overrides individual fields with flags.
//!
//! | Variable                 | Field           | Default |
//! |--------------------------|-----------------|---------|
//! | `SONDE_COMPARE`          | `compare`       | `fast`  |
//! | `SONDE_STACK_RED_ZONE`   | `stack_red_zone`| `128`   |
//! | `SONDE_CAPTURE_STACK`    | `capture_stack` | `true`  |
//! | `SONDE_POLL_INTERVAL_MS` | `poll_interval` | `20`    |
//! | `SONDE_MAX_STATES`       | `max_states`    | unset   |

use std::str::FromStr;
use std::time::Duration;

pub const ENV_COMPARE: &str = "SONDE_COMPARE";
pub const ENV_STACK_RED_ZONE: &str = "SONDE_STACK_RED_ZONE";
pub const ENV_CAPTURE_STACK: &str = "SONDE_CAPTURE_STACK";
pub const ENV_POLL_INTERVAL_MS: &str = "SONDE_POLL_INTERVAL_MS";
pub const ENV_MAX_STATES: &str = "SONDE_MAX_STATES";

/// How visited states are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareSetting
{
    /// Fingerprints only
    #[default]
    Fast,
    /// Fingerprints, then every byte
    Exhaustive,
}

impl FromStr for CompareSetting
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "fast" | "fingerprint" => Ok(CompareSetting::Fast),
            "exhaustive" | "full" => Ok(CompareSetting::Exhaustive),
            _ => Err(format!("unknown compare mode `{s}`, use 'fast' or 'exhaustive'")),
        }
    }
}

/// Checker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SondeConfig
{
    pub compare: CompareSetting,
    /// Bytes below the stack pointer captured with the stack.
    pub stack_red_zone: u64,
    pub capture_stack: bool,
    /// Liveness poll tick while waiting for a channel message.
    pub poll_interval: Duration,
    /// Stop after this many distinct states.
    pub max_states: Option<usize>,
}

impl Default for SondeConfig
{
    fn default() -> Self
    {
        Self {
            compare: CompareSetting::Fast,
            stack_red_zone: 128,
            capture_stack: true,
            poll_interval: Duration::from_millis(20),
            max_states: None,
        }
    }
}

impl SondeConfig
{
    /// Read the configuration from the process environment.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first variable that is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to
    /// its value. Unset variables keep their defaults.
    ///
    /// ```rust
    /// use std::time::Duration;
    ///
    /// use sonde_utils::{CompareSetting, SondeConfig};
    ///
    /// let config = SondeConfig::from_lookup(|key| match key {
    ///     "SONDE_COMPARE" => Some("exhaustive".to_string()),
    ///     "SONDE_POLL_INTERVAL_MS" => Some("5".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.compare, CompareSetting::Exhaustive);
    /// assert_eq!(config.poll_interval, Duration::from_millis(5));
    /// ```
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first value that cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_COMPARE) {
            config.compare = value.parse().map_err(|reason| invalid(ENV_COMPARE, &value, reason))?;
        }
        if let Some(value) = lookup(ENV_STACK_RED_ZONE) {
            config.stack_red_zone = parse_number(ENV_STACK_RED_ZONE, &value)?;
        }
        if let Some(value) = lookup(ENV_CAPTURE_STACK) {
            config.capture_stack = parse_bool(ENV_CAPTURE_STACK, &value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis: u64 = parse_number(ENV_POLL_INTERVAL_MS, &value)?;
            if millis == 0 {
                return Err(invalid(ENV_POLL_INTERVAL_MS, &value, "must be at least 1".to_string()));
            }
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_MAX_STATES) {
            config.max_states = Some(parse_number(ENV_MAX_STATES, &value)?);
        }

        Ok(config)
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|error: T::Err| invalid(key, value, error.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean".to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: String) -> ConfigError
{
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError
{
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid
    {
        /// Environment variable name
        key: &'static str,
        value: String,
        reason: String,
    },
}
