//! Cooperative event loop and cross-thread completion.

pub mod event_loop;
pub mod remote;

pub use event_loop::{
    current, defer_after, defer_later, delay, install, now, run, EventLoop, RunStats, Task,
};
pub use remote::Completion;
