//! Single-threaded cooperative event loop.
//!
//! Every thread owns one loop. Reactions registered on operations are queued
//! here through [`defer_later`] and only run once [`run`] drives the loop, so
//! nothing scheduled from inside a call ever executes before that call returns.
//!
//! ```
//! use prometheus_operation::core::Operation;
//! use prometheus_operation::runtime;
//!
//! let city = Operation::immediate_success("NYC".to_string());
//! let shouted = city.map(|c| c + "!");
//! assert!(shouted.result().is_none());
//!
//! runtime::run().unwrap();
//! assert_eq!(shouted.result().as_deref(), Some("NYC!"));
//! ```

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LoopConfig;
use crate::core::{Operation, OperationError, SchedulerError};
use crate::util::clock::Clock;

use super::remote::{Completion, RemotePayload, RemoteQueue};

/// Unit of work executed on one turn of the loop.
pub type Task = Box<dyn FnOnce()>;

type RemoteHandler = Box<dyn FnOnce(RemotePayload)>;

thread_local! {
    static CURRENT: RefCell<EventLoop> = RefCell::new(EventLoop::new(LoopConfig::default()));
}

/// Counters describing one call to [`EventLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Tasks executed.
    pub turns: u64,
    /// Timers that came due and were queued.
    pub timers_fired: u64,
    /// Outcomes delivered from other threads.
    pub remote_completions: u64,
}

struct TimerEntry {
    deadline: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct LoopInner {
    config: LoopConfig,
    clock: RefCell<Clock>,
    ready: RefCell<VecDeque<Task>>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    next_seq: Cell<u64>,
    running: Cell<bool>,
    remote: Arc<RemoteQueue>,
    remote_handlers: RefCell<HashMap<u64, RemoteHandler>>,
}

/// Handle to a thread's event loop. Cloning shares the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

/// Resets the running flag even if a task panics.
struct RunningGuard<'a> {
    flag: &'a Cell<bool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl EventLoop {
    fn new(config: LoopConfig) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                clock: RefCell::new(Clock::new(config.clock)),
                config,
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
                next_seq: Cell::new(0),
                running: Cell::new(false),
                remote: Arc::new(RemoteQueue::new()),
                remote_handlers: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Configuration this loop was built from.
    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Whether `run` is currently executing.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Current loop-relative time.
    pub fn now(&self) -> Duration {
        self.inner.clock.borrow().now()
    }

    /// Tasks waiting for their turn.
    pub fn pending_tasks(&self) -> usize {
        self.inner.ready.borrow().len()
    }

    /// Timers not yet due.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Completions handed to other threads and not yet delivered.
    pub fn outstanding_completions(&self) -> usize {
        self.inner.remote_handlers.borrow().len()
    }

    /// Queue `task` for a later turn, after everything already queued.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.ready.borrow_mut().push_back(Box::new(task));
    }

    /// Queue `task` once `delay` has elapsed on the loop clock.
    pub fn defer_after(&self, delay: Duration, task: impl FnOnce() + 'static) {
        let deadline = self.now() + delay;
        let seq = self.next_seq();
        self.inner.timers.borrow_mut().push(Reverse(TimerEntry {
            deadline,
            seq,
            task: Box::new(task),
        }));
    }

    /// Register a remote completion whose outcome is handed to `settle` on
    /// this loop's thread.
    pub(crate) fn register_remote<T>(
        &self,
        settle: impl FnOnce(Result<T, OperationError>) + 'static,
    ) -> Completion<T>
    where
        T: Send + 'static,
    {
        let ticket = self.next_seq();
        let handler: RemoteHandler = Box::new(move |payload: RemotePayload| {
            let outcome = payload
                .downcast::<Result<T, OperationError>>()
                .map_or_else(
                    |_| {
                        Err(OperationError::new(
                            "remote completion delivered an unexpected payload",
                        ))
                    },
                    |outcome| *outcome,
                );
            settle(outcome);
        });
        self.inner.remote_handlers.borrow_mut().insert(ticket, handler);
        Completion::new(ticket, Arc::clone(&self.inner.remote))
    }

    /// Run turns until no task, timer, or outstanding completion remains.
    ///
    /// With nothing else queued, the loop blocks until each outstanding
    /// [`Completion`] is completed or dropped by the thread holding it.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Reentrant`] when called from inside a turn, and
    /// [`SchedulerError::TurnBudgetExhausted`] when `max_turns` is reached
    /// with work still queued.
    pub fn run(&self) -> Result<RunStats, SchedulerError> {
        if self.inner.running.replace(true) {
            return Err(SchedulerError::Reentrant);
        }
        let _running = RunningGuard {
            flag: &self.inner.running,
        };
        let mut stats = RunStats::default();

        loop {
            stats.remote_completions += self.deliver_remote();
            stats.timers_fired += self.queue_due_timers();

            if self.pending_tasks() > 0 {
                if let Some(max_turns) = self.inner.config.max_turns {
                    if stats.turns >= max_turns {
                        warn!(turns = stats.turns, "event loop turn budget exhausted");
                        return Err(SchedulerError::TurnBudgetExhausted { turns: stats.turns });
                    }
                }
                let task = self.inner.ready.borrow_mut().pop_front();
                if let Some(task) = task {
                    stats.turns += 1;
                    task();
                }
                continue;
            }

            if let Some(deadline) = self.next_deadline() {
                self.wait_for_timer(deadline);
                continue;
            }

            let outstanding = self.outstanding_completions();
            if outstanding > 0 {
                debug!(outstanding, "event loop waiting for remote completions");
                self.inner.remote.wait(None);
                continue;
            }

            break;
        }

        debug!(
            turns = stats.turns,
            timers_fired = stats.timers_fired,
            remote_completions = stats.remote_completions,
            "event loop idle"
        );
        Ok(stats)
    }

    fn next_seq(&self) -> u64 {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        seq
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.inner
            .timers
            .borrow()
            .peek()
            .map(|Reverse(entry)| entry.deadline)
    }

    fn queue_due_timers(&self) -> u64 {
        let now = self.now();
        let mut fired = 0;
        loop {
            let due = {
                let mut timers = self.inner.timers.borrow_mut();
                let is_due = timers
                    .peek()
                    .is_some_and(|Reverse(entry)| entry.deadline <= now);
                if is_due {
                    timers.pop()
                } else {
                    None
                }
            };
            let Some(Reverse(entry)) = due else {
                break;
            };
            self.inner.ready.borrow_mut().push_back(entry.task);
            fired += 1;
        }
        fired
    }

    fn wait_for_timer(&self, deadline: Duration) {
        let wake_at = {
            let mut clock = self.inner.clock.borrow_mut();
            clock.advance_to(deadline);
            clock.instant_at(deadline)
        };
        if let Some(instant) = wake_at {
            self.inner.remote.wait(Some(instant));
        }
    }

    fn deliver_remote(&self) -> u64 {
        let mut delivered = 0;
        for message in self.inner.remote.drain() {
            let handler = self.inner.remote_handlers.borrow_mut().remove(&message.ticket);
            match handler {
                Some(handler) => {
                    handler(message.payload);
                    delivered += 1;
                }
                None => warn!(ticket = message.ticket, "remote completion for unknown ticket"),
            }
        }
        delivered
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("config", &self.inner.config)
            .field("now", &self.now())
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .field("outstanding_completions", &self.outstanding_completions())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle to the current thread's loop.
pub fn current() -> EventLoop {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Replace the current thread's loop with a fresh one built from `config`.
///
/// Work queued on the previous loop is discarded, with a warning that
/// counts the dropped tasks, timers, and completions.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] when validation fails and
/// [`SchedulerError::Busy`] when the current loop is running.
pub fn install(config: LoopConfig) -> Result<EventLoop, SchedulerError> {
    config.validate().map_err(SchedulerError::InvalidConfig)?;
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_running() {
            return Err(SchedulerError::Busy);
        }
        let dropped_tasks = slot.pending_tasks();
        let dropped_timers = slot.pending_timers();
        let dropped_completions = slot.outstanding_completions();
        if dropped_tasks + dropped_timers + dropped_completions > 0 {
            warn!(
                dropped_tasks,
                dropped_timers,
                dropped_completions,
                "replacing event loop discards queued work"
            );
        }
        *slot = EventLoop::new(config);
        Ok(slot.clone())
    })
}

/// Run `task` on a later turn of the current thread's loop.
pub fn defer_later(task: impl FnOnce() + 'static) {
    CURRENT.with(|slot| slot.borrow().defer(task));
}

/// Run `task` after `delay` on the current thread's loop.
pub fn defer_after(delay: Duration, task: impl FnOnce() + 'static) {
    CURRENT.with(|slot| slot.borrow().defer_after(delay, task));
}

/// Operation that succeeds once `duration` has elapsed on the loop clock.
pub fn delay(duration: Duration) -> Operation<()> {
    let timer = Operation::new();
    let resolver = timer.clone();
    defer_after(duration, move || resolver.resolve(()));
    timer
}

/// Current loop-relative time on this thread.
pub fn now() -> Duration {
    current().now()
}

/// Drive the current thread's loop until it goes idle.
///
/// # Errors
///
/// See [`EventLoop::run`].
pub fn run() -> Result<RunStats, SchedulerError> {
    current().run()
}
