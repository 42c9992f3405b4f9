//! Tests for configuration validation

use prometheus_operation::config::{ClockMode, LoopConfig};

#[test]
fn test_loop_config_validation() {
    let valid = LoopConfig {
        clock: ClockMode::Virtual,
        max_turns: Some(1000),
        default_delay_ms: 1,
    };
    assert!(valid.validate().is_ok());
}

#[test]
fn test_loop_config_invalid_max_turns() {
    let invalid = LoopConfig {
        clock: ClockMode::Wall,
        max_turns: Some(0),
        default_delay_ms: 1,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_loop_config_from_json() {
    let json = r#"{
        "clock": "wall",
        "max_turns": 500,
        "default_delay_ms": 25
    }"#;

    let config = LoopConfig::from_json_str(json).unwrap();
    assert_eq!(config.clock, ClockMode::Wall);
    assert_eq!(config.max_turns, Some(500));
    assert_eq!(config.default_delay_ms, 25);
}

#[test]
fn test_loop_config_from_json_rejects_unknown_clock() {
    let json = r#"{ "clock": "lunar" }"#;
    let err = LoopConfig::from_json_str(json).unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_loop_config_from_json_validates() {
    let json = r#"{ "max_turns": 0 }"#;
    assert!(LoopConfig::from_json_str(json).is_err());
}

#[test]
fn test_loop_config_builder() {
    let config = LoopConfig::new()
        .with_clock(ClockMode::Wall)
        .with_max_turns(10)
        .with_default_delay_ms(5);
    assert_eq!(config.clock, ClockMode::Wall);
    assert_eq!(config.max_turns, Some(10));
    assert_eq!(config.default_delay().as_millis(), 5);
}

// The only test touching these variables, so it cannot race another test.
#[test]
fn test_loop_config_from_env() {
    std::env::set_var("OPERATION_CLOCK", "WALL");
    std::env::set_var("OPERATION_MAX_TURNS", "64");
    std::env::set_var("OPERATION_DEFAULT_DELAY_MS", "3");
    let config = LoopConfig::from_env();

    std::env::set_var("OPERATION_MAX_TURNS", "many");
    let bad = LoopConfig::from_env();

    std::env::remove_var("OPERATION_CLOCK");
    std::env::remove_var("OPERATION_MAX_TURNS");
    std::env::remove_var("OPERATION_DEFAULT_DELAY_MS");

    let config = config.unwrap();
    assert_eq!(config.clock, ClockMode::Wall);
    assert_eq!(config.max_turns, Some(64));
    assert_eq!(config.default_delay_ms, 3);

    let err = bad.unwrap_err();
    assert!(err.to_string().contains("OPERATION_MAX_TURNS"));
}
