//! Tests for utility functions

use std::time::Duration;

use prometheus_operation::config::ClockMode;
use prometheus_operation::util::{init_tracing, Clock};

#[test]
fn test_virtual_clock_advances_to_deadline() {
    let mut clock = Clock::new(ClockMode::Virtual);
    clock.advance_to(Duration::from_millis(40));
    assert_eq!(clock.now(), Duration::from_millis(40));
    assert!(clock.is_virtual());
}

#[test]
fn test_wall_clock_maps_deadlines_to_instants() {
    let clock = Clock::new(ClockMode::Wall);
    let first = clock.instant_at(Duration::from_millis(1)).unwrap();
    let second = clock.instant_at(Duration::from_millis(2)).unwrap();
    assert_eq!(second - first, Duration::from_millis(1));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
}
