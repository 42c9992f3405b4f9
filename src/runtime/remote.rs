//! Cross-thread completion of operations.
//!
//! Operations are single-threaded (`Rc`-based) and settle only on the thread
//! that owns their event loop. Work running on another OS thread reports its
//! outcome through a [`Completion`] handle, which posts the outcome into the
//! loop's inbox. The loop settles the operation on its own thread, so the
//! settle-once latch is never touched concurrently.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::core::OperationError;

/// Type-erased outcome travelling from a worker thread to the loop.
pub(crate) type RemotePayload = Box<dyn Any + Send>;

/// Outcome posted for a registered ticket.
pub(crate) struct RemoteMessage {
    pub(crate) ticket: u64,
    pub(crate) payload: RemotePayload,
}

/// Inbox shared between an event loop and its outstanding completions.
///
/// Uses `parking_lot::Mutex` for the message queue and `parking_lot::Condvar`
/// to wake an idle loop when a message arrives.
pub(crate) struct RemoteQueue {
    inbox: Mutex<VecDeque<RemoteMessage>>,
    wake: Condvar,
}

impl RemoteQueue {
    pub(crate) fn new() -> Self {
        Self {
            inbox: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
        }
    }

    fn post(&self, message: RemoteMessage) {
        self.inbox.lock().push_back(message);
        self.wake.notify_one();
    }

    /// Take every message posted so far.
    pub(crate) fn drain(&self) -> VecDeque<RemoteMessage> {
        std::mem::take(&mut *self.inbox.lock())
    }

    /// Block until a message is available or `until` passes.
    /// With no deadline, waits for the next message.
    pub(crate) fn wait(&self, until: Option<Instant>) {
        let mut inbox = self.inbox.lock();
        match until {
            Some(deadline) => {
                while inbox.is_empty() {
                    if self.wake.wait_until(&mut inbox, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while inbox.is_empty() {
                    self.wake.wait(&mut inbox);
                }
            }
        }
    }
}

/// Sendable handle that settles one operation from any thread.
///
/// Obtained from [`Operation::remote_completion`](crate::core::Operation::remote_completion).
/// The owning event loop keeps running while a handle is outstanding.
/// Dropping the handle without completing it rejects the operation.
pub struct Completion<T: Send + 'static> {
    ticket: u64,
    queue: Option<Arc<RemoteQueue>>,
    _outcome: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn new(ticket: u64, queue: Arc<RemoteQueue>) -> Self {
        Self {
            ticket,
            queue: Some(queue),
            _outcome: PhantomData,
        }
    }

    /// Deliver the outcome to the owning loop.
    pub fn complete(mut self, outcome: Result<T, OperationError>) {
        self.post(outcome);
    }

    /// Deliver a success value.
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Deliver a failure.
    pub fn fail(self, error: impl Into<OperationError>) {
        self.complete(Err(error.into()));
    }

    fn post(&mut self, outcome: Result<T, OperationError>) {
        if let Some(queue) = self.queue.take() {
            queue.post(RemoteMessage {
                ticket: self.ticket,
                payload: Box::new(outcome),
            });
        }
    }
}

impl<T: Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.queue.is_some() {
            warn!(ticket = self.ticket, "completion dropped before it was completed");
            self.post(Err(OperationError::new(
                "completion dropped before it was completed",
            )));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("delivered", &self.queue.is_none())
            .finish()
    }
}
