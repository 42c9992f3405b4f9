//! Error types for operations and the event loop.

use thiserror::Error;

/// Failure value carried by a rejected [`Operation`](crate::core::Operation).
///
/// Every rejection, whether it came from an explicit `reject` or from a
/// reaction returning `Err`, travels downstream as this type, so recovery
/// chains can inspect and rethrow it uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
    #[source]
    cause: Option<Box<OperationError>>,
}

impl OperationError {
    /// Create an error with the given message and no cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Create an error that records `cause` as its source.
    pub fn with_cause(message: impl Into<String>, cause: Self) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Wrap this error under a new message, keeping it as the cause.
    #[must_use]
    pub fn wrap(self, message: impl Into<String>) -> Self {
        Self::with_cause(message, self)
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error this one was raised from, if any.
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// Innermost error of the cause chain.
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors produced by the event loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `run` was called from inside a turn of the same loop.
    #[error("event loop is already running")]
    Reentrant,
    /// The loop cannot be replaced while it is running.
    #[error("event loop is busy")]
    Busy,
    /// The configured turn budget was used up before the loop went idle.
    #[error("turn budget exhausted after {turns} turns")]
    TurnBudgetExhausted {
        /// Turns executed before giving up.
        turns: u64,
    },
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
