//! Tests for the logging sink

use sonde_utils::{LogFormat, LogLevel, emit};

#[test]
fn test_emit_without_subscriber_is_silent()
{
    for level in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug, LogLevel::Trace] {
        emit("mc.state", level, "nothing listens");
    }
}

#[test]
fn test_format_aliases()
{
    assert_eq!("production".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert_eq!("development".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    let error = "yaml".parse::<LogFormat>().unwrap_err();
    assert!(error.contains("yaml"));
}
