//! Configuration models for the event loop.

pub mod event_loop;

pub use event_loop::{ClockMode, LoopConfig};
