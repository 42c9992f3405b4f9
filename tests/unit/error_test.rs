//! Tests for error types

use prometheus_operation::core::{OperationError, SchedulerError};

#[test]
fn test_operation_error_displays_message() {
    let err = OperationError::new("GPS broken");
    assert_eq!(format!("{}", err), "GPS broken");
}

#[test]
fn test_operation_error_from_string() {
    let err: OperationError = String::from("City required to get forecast").into();
    assert_eq!(err.message(), "City required to get forecast");
    assert!(err.cause().is_none());
}

#[test]
fn test_reentrant_error() {
    let err = SchedulerError::Reentrant;
    assert_eq!(format!("{}", err), "event loop is already running");
}

#[test]
fn test_busy_error() {
    let err = SchedulerError::Busy;
    assert_eq!(format!("{}", err), "event loop is busy");
}

#[test]
fn test_turn_budget_error() {
    let err = SchedulerError::TurnBudgetExhausted { turns: 12 };
    assert_eq!(format!("{}", err), "turn budget exhausted after 12 turns");
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("max_turns must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_turns must be greater than 0"
    );
}
