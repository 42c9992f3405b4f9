//! Chainable single-resolution deferred operations.
//!
//! An [`Operation`] starts pending and settles at most once, either succeeding
//! with a value or failing with an [`OperationError`]. Reactions attached with
//! [`Operation::then`] and its shorthands never run inline: they are queued on
//! the current thread's event loop and fire on a later turn, in the order they
//! were registered.
//!
//! # Examples
//!
//! ```
//! use prometheus_operation::core::{Operation, OperationError};
//! use prometheus_operation::runtime;
//!
//! let city: Operation<String> = Operation::new();
//! let greeting = city
//!     .try_map(|_| -> Result<String, OperationError> { Err("whoops".into()) })
//!     .recover(|e| format!("recovered from {}", e.message()));
//!
//! city.resolve("NYC".to_string());
//! runtime::run().unwrap();
//!
//! assert_eq!(greeting.result().as_deref(), Some("recovered from whoops"));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::core::OperationError;
use crate::runtime::{self, Completion};

/// Unique identifier attached to every operation for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Observable lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Not settled yet, or still adopting another operation.
    Pending,
    /// Settled with a value.
    Succeeded,
    /// Settled with an error.
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// What an operation is resolved with: a plain value, or another operation
/// whose eventual outcome is adopted.
pub enum Resolution<T> {
    /// Succeed with this value.
    Value(T),
    /// Stay pending until the inner operation settles, then mirror it.
    Adopt(Operation<T>),
}

impl<T> From<Operation<T>> for Resolution<T> {
    fn from(operation: Operation<T>) -> Self {
        Self::Adopt(operation)
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Adopt(operation) => f.debug_tuple("Adopt").field(operation).finish(),
        }
    }
}

/// Return type of a reaction. `Err` rejects the downstream operation.
pub type Reaction<U> = Result<Resolution<U>, OperationError>;

type SuccessCallback<T> = Box<dyn FnOnce(T)>;
type ErrorCallback = Box<dyn FnOnce(OperationError)>;

enum Outcome<T> {
    Pending,
    Succeeded(T),
    Failed(OperationError),
}

struct Inner<T> {
    id: OperationId,
    outcome: Outcome<T>,
    /// Set by the first resolve/reject; may be true while still pending
    /// during adoption.
    settled: bool,
    on_success: Vec<SuccessCallback<T>>,
    on_error: Vec<ErrorCallback>,
}

impl<T> Inner<T> {
    fn state(&self) -> OperationState {
        match self.outcome {
            Outcome::Pending => OperationState::Pending,
            Outcome::Succeeded(_) => OperationState::Succeeded,
            Outcome::Failed(_) => OperationState::Failed,
        }
    }
}

/// A deferred unit of work that eventually succeeds with a `T` or fails.
///
/// Cloning an `Operation` yields another handle to the same unit. Handles are
/// `!Send`: an operation belongs to the thread whose event loop runs its
/// reactions. Use [`Operation::remote_completion`] to settle it from another
/// thread.
pub struct Operation<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Operation<T> {
    /// Identifier used in log events.
    pub fn id(&self) -> OperationId {
        self.inner.borrow().id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        self.inner.borrow().state()
    }

    /// Whether resolve or reject has already been called.
    pub fn is_settled(&self) -> bool {
        self.inner.borrow().settled
    }

    /// Whether both handles refer to the same operation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Operation<T> {
    /// Create a pending operation with no reactions.
    pub fn new() -> Self {
        let operation = Self {
            inner: Rc::new(RefCell::new(Inner {
                id: OperationId::generate(),
                outcome: Outcome::Pending,
                settled: false,
                on_success: Vec::new(),
                on_error: Vec::new(),
            })),
        };
        trace!(operation = %operation.id(), "operation created");
        operation
    }

    /// Create an operation and hand its resolve/reject functions to
    /// `executor`, which runs synchronously before this returns.
    pub fn with_executor<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejecter<T>),
    {
        let operation = Self::new();
        executor(
            Resolver {
                operation: operation.clone(),
            },
            Rejecter {
                operation: operation.clone(),
            },
        );
        operation
    }

    /// Operation already resolved with `value`.
    pub fn immediate_success(value: T) -> Self {
        Self::from_resolution(Resolution::Value(value))
    }

    /// Operation resolved with `resolution`; adopting if it is an operation.
    pub fn from_resolution(resolution: Resolution<T>) -> Self {
        let operation = Self::new();
        operation.resolve_with(resolution);
        operation
    }

    /// Operation already failed with `error`.
    pub fn immediate_failure(error: impl Into<OperationError>) -> Self {
        let operation = Self::new();
        operation.reject(error);
        operation
    }

    /// The success value, once succeeded.
    pub fn result(&self) -> Option<T> {
        match &self.inner.borrow().outcome {
            Outcome::Succeeded(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The failure, once failed.
    pub fn error(&self) -> Option<OperationError> {
        match &self.inner.borrow().outcome {
            Outcome::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Succeed with `value`. Ignored if already settled.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    /// Resolve with the eventual outcome of `inner`. Ignored if already settled.
    pub fn adopt(&self, inner: Self) {
        self.resolve_with(Resolution::Adopt(inner));
    }

    /// Resolve with a value or adopt an operation. Only the first call to
    /// any resolve or reject method has an effect.
    pub fn resolve_with(&self, resolution: Resolution<T>) {
        if !self.claim("resolve") {
            return;
        }
        match resolution {
            Resolution::Value(value) => self.succeed(value),
            Resolution::Adopt(inner) => self.follow(&inner),
        }
    }

    /// Fail with `error`. Ignored if already settled.
    pub fn reject(&self, error: impl Into<OperationError>) {
        if !self.claim("reject") {
            return;
        }
        self.fail(error.into());
    }

    /// Attach success and failure reactions, returning an operation for
    /// whatever the invoked reaction produces.
    ///
    /// Exactly one of the two reactions runs, on a later loop turn, even if
    /// this operation has already settled.
    pub fn then<U, S, F>(&self, on_success: S, on_error: F) -> Operation<U>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Reaction<U> + 'static,
        F: FnOnce(OperationError) -> Reaction<U> + 'static,
    {
        let proxy = Operation::new();
        let success_proxy = Downstream::new(&proxy);
        let failure_proxy = Downstream::new(&proxy);
        self.react(
            move |value| success_proxy.settle(on_success(value)),
            move |error| failure_proxy.settle(on_error(error)),
        );
        proxy
    }

    /// Attach a success reaction; failures pass through unchanged.
    pub fn then_success<U, S>(&self, on_success: S) -> Operation<U>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Reaction<U> + 'static,
    {
        self.then(on_success, Err)
    }

    /// Attach a failure reaction; success values pass through unchanged.
    pub fn catch<F>(&self, on_error: F) -> Self
    where
        F: FnOnce(OperationError) -> Reaction<T> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_error)
    }

    /// Chain with no reactions: the returned operation mirrors this one.
    pub fn forward(&self) -> Self {
        self.then(|value| Ok(Resolution::Value(value)), Err)
    }

    /// Transform the success value.
    pub fn map<U, M>(&self, f: M) -> Operation<U>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> U + 'static,
    {
        self.then_success(move |value| Ok(Resolution::Value(f(value))))
    }

    /// Transform the success value with a step that may fail.
    pub fn try_map<U, M>(&self, f: M) -> Operation<U>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> Result<U, OperationError> + 'static,
    {
        self.then_success(move |value| f(value).map(Resolution::Value))
    }

    /// Continue with another operation built from the success value.
    pub fn and_then<U, M>(&self, f: M) -> Operation<U>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> Operation<U> + 'static,
    {
        self.then_success(move |value| Ok(Resolution::Adopt(f(value))))
    }

    /// Replace a failure with a value.
    pub fn recover<M>(&self, f: M) -> Self
    where
        M: FnOnce(OperationError) -> T + 'static,
    {
        self.catch(move |error| Ok(Resolution::Value(f(error))))
    }

    /// Replace a failure with the outcome of another operation.
    pub fn or_else<M>(&self, f: M) -> Self
    where
        M: FnOnce(OperationError) -> Self + 'static,
    {
        self.catch(move |error| Ok(Resolution::Adopt(f(error))))
    }

    /// Callback that settles this operation from a `Result`, for
    /// callback-style collaborators that report an error or a value once.
    pub fn completion_callback(&self) -> impl FnOnce(Result<T, OperationError>) + 'static {
        let operation = self.clone();
        move |outcome| operation.settle_outcome(outcome)
    }

    /// Sendable handle that settles this operation from another thread.
    ///
    /// The current thread's event loop keeps running until the handle is
    /// completed or dropped. Move it to another thread (or drop it) before
    /// calling [`runtime::run`]: a handle still held by the loop's own thread
    /// can never post, so `run` would block waiting for it.
    pub fn remote_completion(&self) -> Completion<T>
    where
        T: Send,
    {
        let operation = self.clone();
        runtime::current().register_remote(move |outcome| operation.settle_outcome(outcome))
    }

    fn settle_outcome(&self, outcome: Result<T, OperationError>) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    fn settle(&self, reaction: Reaction<T>) {
        match reaction {
            Ok(resolution) => self.resolve_with(resolution),
            Err(error) => self.reject(error),
        }
    }

    /// Flip the settle-once latch. Returns false if it was already set.
    fn claim(&self, action: &'static str) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.settled {
            debug!(operation = %inner.id, action, "ignoring repeated settlement");
            return false;
        }
        inner.settled = true;
        true
    }

    fn follow(&self, inner: &Self) {
        if self.ptr_eq(inner) {
            self.fail(OperationError::new("operation cannot adopt itself"));
            return;
        }
        trace!(operation = %self.id(), inner = %inner.id(), "adopting operation");
        let on_value = Downstream::new(self);
        let on_error = Downstream::new(self);
        inner.react(
            move |value| on_value.succeed(value),
            move |error| on_error.fail(error),
        );
    }

    fn succeed(&self, value: T) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(matches!(inner.outcome, Outcome::Pending));
            inner.outcome = Outcome::Succeeded(value.clone());
            inner.on_error.clear();
            std::mem::take(&mut inner.on_success)
        };
        trace!(operation = %self.id(), reactions = callbacks.len(), "operation succeeded");
        for callback in callbacks {
            callback(value.clone());
        }
    }

    fn fail(&self, error: OperationError) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(matches!(inner.outcome, Outcome::Pending));
            inner.outcome = Outcome::Failed(error.clone());
            inner.on_success.clear();
            std::mem::take(&mut inner.on_error)
        };
        trace!(operation = %self.id(), reactions = callbacks.len(), error = %error, "operation failed");
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Register a reaction pair. Whichever side fires is deferred to a later
    /// loop turn, whether the operation is already settled or not.
    fn react<S, F>(&self, on_success: S, on_error: F)
    where
        S: FnOnce(T) + 'static,
        F: FnOnce(OperationError) + 'static,
    {
        let success: SuccessCallback<T> =
            Box::new(move |value| runtime::defer_later(move || on_success(value)));
        let failure: ErrorCallback =
            Box::new(move |error| runtime::defer_later(move || on_error(error)));

        let settled = match &self.inner.borrow().outcome {
            Outcome::Pending => None,
            Outcome::Succeeded(value) => Some(Ok(value.clone())),
            Outcome::Failed(error) => Some(Err(error.clone())),
        };

        match settled {
            None => {
                let mut inner = self.inner.borrow_mut();
                inner.on_success.push(success);
                inner.on_error.push(failure);
            }
            Some(Ok(value)) => success(value),
            Some(Err(error)) => failure(error),
        }
    }
}

thread_local! {
    static RECLAIM: RefCell<Reclaimer> = const {
        RefCell::new(Reclaimer {
            draining: false,
            queue: Vec::new(),
        })
    };
}

/// Operations released by reaction closures, waiting to be dropped.
///
/// A pending chain owns itself link by link (callback -> next operation ->
/// its callbacks), so freeing it through drop glue would recurse once per
/// link. Releases are queued here instead and the outermost release drains
/// the queue in a loop.
struct Reclaimer {
    draining: bool,
    queue: Vec<Box<dyn Any>>,
}

fn reclaim(released: Box<dyn Any>) {
    let drain = RECLAIM.try_with(|reclaimer| {
        let mut reclaimer = reclaimer.borrow_mut();
        reclaimer.queue.push(released);
        !std::mem::replace(&mut reclaimer.draining, true)
    });
    // Thread teardown already destroyed the queue; the value was dropped
    // inline by the failed closure.
    if !matches!(drain, Ok(true)) {
        return;
    }
    while let Some(next) = RECLAIM.with(|reclaimer| reclaimer.borrow_mut().queue.pop()) {
        drop(next);
    }
    RECLAIM.with(|reclaimer| reclaimer.borrow_mut().draining = false);
}

/// Handle on the operation a reaction settles. Dropping it hands the
/// operation to [`reclaim`] rather than freeing it in place.
struct Downstream<T: Clone + 'static> {
    operation: Option<Operation<T>>,
}

impl<T: Clone + 'static> Downstream<T> {
    fn new(operation: &Operation<T>) -> Self {
        Self {
            operation: Some(operation.clone()),
        }
    }

    fn settle(&self, reaction: Reaction<T>) {
        if let Some(operation) = &self.operation {
            operation.settle(reaction);
        }
    }

    fn succeed(&self, value: T) {
        if let Some(operation) = &self.operation {
            operation.succeed(value);
        }
    }

    fn fail(&self, error: OperationError) {
        if let Some(operation) = &self.operation {
            operation.fail(error);
        }
    }
}

impl<T: Clone + 'static> Drop for Downstream<T> {
    fn drop(&mut self) {
        if let Some(operation) = self.operation.take() {
            reclaim(Box::new(operation));
        }
    }
}

impl<T: Clone + 'static> Default for Operation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Operation")
            .field("id", &inner.id)
            .field("state", &inner.state())
            .field("settled", &inner.settled)
            .field("queued_reactions", &inner.on_success.len())
            .finish()
    }
}

/// Resolve function handed to an executor.
pub struct Resolver<T> {
    operation: Operation<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
        }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Succeed with `value`.
    pub fn resolve(&self, value: T) {
        self.operation.resolve(value);
    }

    /// Resolve with a value or adopt an operation.
    pub fn resolve_with(&self, resolution: Resolution<T>) {
        self.operation.resolve_with(resolution);
    }

    /// Adopt the outcome of `inner`.
    pub fn adopt(&self, inner: Operation<T>) {
        self.operation.adopt(inner);
    }
}

/// Reject function handed to an executor.
pub struct Rejecter<T> {
    operation: Operation<T>,
}

impl<T> Clone for Rejecter<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
        }
    }
}

impl<T: Clone + 'static> Rejecter<T> {
    /// Fail with `error`.
    pub fn reject(&self, error: impl Into<OperationError>) {
        self.operation.reject(error);
    }
}
