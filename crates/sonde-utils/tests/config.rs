//! Tests for environment-driven configuration

use std::collections::HashMap;
use std::time::Duration;

use sonde_utils::{CompareSetting, ConfigError, SondeConfig};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
{
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_when_nothing_is_set()
{
    let config = SondeConfig::from_lookup(|_| None).unwrap();
    assert_eq!(config, SondeConfig::default());
    assert_eq!(config.compare, CompareSetting::Fast);
    assert_eq!(config.stack_red_zone, 128);
    assert!(config.capture_stack);
    assert_eq!(config.poll_interval, Duration::from_millis(20));
    assert_eq!(config.max_states, None);
}

#[test]
fn test_every_variable_is_read()
{
    let config = SondeConfig::from_lookup(lookup(&[
        ("SONDE_COMPARE", "Exhaustive"),
        ("SONDE_STACK_RED_ZONE", "256"),
        ("SONDE_CAPTURE_STACK", "off"),
        ("SONDE_POLL_INTERVAL_MS", " 7 "),
        ("SONDE_MAX_STATES", "1000"),
    ]))
    .unwrap();

    assert_eq!(config.compare, CompareSetting::Exhaustive);
    assert_eq!(config.stack_red_zone, 256);
    assert!(!config.capture_stack);
    assert_eq!(config.poll_interval, Duration::from_millis(7));
    assert_eq!(config.max_states, Some(1000));
}

#[test]
fn test_boolean_spellings()
{
    for value in ["1", "true", "YES", "on"] {
        let config = SondeConfig::from_lookup(lookup(&[("SONDE_CAPTURE_STACK", value)])).unwrap();
        assert!(config.capture_stack, "{value}");
    }
    for value in ["0", "false", "no", "Off"] {
        let config = SondeConfig::from_lookup(lookup(&[("SONDE_CAPTURE_STACK", value)])).unwrap();
        assert!(!config.capture_stack, "{value}");
    }
}

#[test]
fn test_invalid_values_name_the_variable()
{
    let error = SondeConfig::from_lookup(lookup(&[("SONDE_MAX_STATES", "many")])).unwrap_err();
    let ConfigError::Invalid { key, value, .. } = &error;
    assert_eq!(*key, "SONDE_MAX_STATES");
    assert_eq!(value, "many");
    assert!(error.to_string().contains("SONDE_MAX_STATES"));

    let error = SondeConfig::from_lookup(lookup(&[("SONDE_COMPARE", "slow")])).unwrap_err();
    assert!(error.to_string().contains("slow"));

    assert!(SondeConfig::from_lookup(lookup(&[("SONDE_CAPTURE_STACK", "maybe")])).is_err());
    assert!(SondeConfig::from_lookup(lookup(&[("SONDE_STACK_RED_ZONE", "-1")])).is_err());
}

#[test]
fn test_zero_poll_interval_is_rejected()
{
    let error = SondeConfig::from_lookup(lookup(&[("SONDE_POLL_INTERVAL_MS", "0")])).unwrap_err();
    assert!(error.to_string().contains("at least 1"));
}

#[test]
fn test_compare_setting_from_str()
{
    assert_eq!("fast".parse::<CompareSetting>().unwrap(), CompareSetting::Fast);
    assert_eq!("FULL".parse::<CompareSetting>().unwrap(), CompareSetting::Exhaustive);
    assert!("".parse::<CompareSetting>().is_err());
}
