//! # Prometheus Operation
//!
//! Chainable, single-resolution deferred operations driven by a cooperative
//! single-threaded event loop.
//!
//! An [`Operation`] is a unit of work that eventually succeeds with a value or
//! fails with an [`OperationError`]. Reactions attached with `then`, `catch`
//! and their shorthands produce new operations, so callback-style work can be
//! composed into flat chains instead of nested callbacks.
//!
//! ## Key Properties
//!
//! - **Settle once**: the first resolve/reject wins; later calls are ignored
//! - **Adoption**: resolving with another operation mirrors its eventual outcome,
//!   however deeply nested
//! - **Always deferred**: reactions run on a later loop turn, even when attached
//!   to an operation that has already settled
//! - **Uniform failures**: an `Err` returned from a reaction and an explicit
//!   rejection travel downstream identically
//! - **Thread handoff**: [`runtime::Completion`] lets an OS thread settle an
//!   operation without ever touching it off its owning thread
//!
//! ## Example
//!
//! ```rust
//! use prometheus_operation::{runtime, Operation, OperationError};
//!
//! let city: Operation<String> = Operation::new();
//!
//! let forecast = city
//!     .map(|city| format!("{city}!"))
//!     .try_map(|city| -> Result<String, OperationError> {
//!         Err(OperationError::new(format!("no forecast for {city}")))
//!     })
//!     .recover(|e| e.message().to_string());
//!
//! city.resolve("NYC".to_string());
//! runtime::run()?;
//!
//! assert_eq!(forecast.result().as_deref(), Some("no forecast for NYC!"));
//! # Ok::<(), prometheus_operation::SchedulerError>(())
//! ```
//!
//! For complete scenarios, see:
//! - `tests/operation_test.rs` - chaining, recovery and adoption scenarios
//! - `tests/remote_completion_test.rs` - settling from worker threads

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Deferred operations and error types.
pub mod core;
/// Configuration models for the event loop.
pub mod config;
/// Event loop, deferred invocation and cross-thread completion.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::core::{Operation, OperationError, OperationState, Resolution, SchedulerError};
pub use crate::config::{ClockMode, LoopConfig};
