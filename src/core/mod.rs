//! Deferred operations and their error types.

pub mod error;
pub mod operation;

pub use error::{AppResult, OperationError, SchedulerError};
pub use operation::{
    Operation, OperationId, OperationState, Reaction, Rejecter, Resolution, Resolver,
};
