//! Loop-relative time source.

use std::time::{Duration, Instant};

use crate::config::ClockMode;

/// Time as seen by an event loop, measured from the loop's creation.
///
/// A virtual clock only moves when the loop advances it to the next timer
/// deadline, which keeps timer-driven code deterministic and instant to run.
/// A wall clock follows [`Instant`].
#[derive(Debug, Clone)]
pub enum Clock {
    /// Deterministic clock advanced explicitly by the loop.
    Virtual {
        /// Time elapsed so far.
        elapsed: Duration,
    },
    /// Real monotonic time.
    Wall {
        /// Moment the loop was created.
        origin: Instant,
    },
}

impl Clock {
    /// Create a clock for the given mode, starting at zero.
    pub fn new(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Virtual => Self::Virtual {
                elapsed: Duration::ZERO,
            },
            ClockMode::Wall => Self::Wall {
                origin: Instant::now(),
            },
        }
    }

    /// Current loop-relative time.
    pub fn now(&self) -> Duration {
        match self {
            Self::Virtual { elapsed } => *elapsed,
            Self::Wall { origin } => origin.elapsed(),
        }
    }

    /// Move a virtual clock forward to `deadline`. Never moves backwards;
    /// a wall clock ignores the request.
    pub fn advance_to(&mut self, deadline: Duration) {
        if let Self::Virtual { elapsed } = self {
            if deadline > *elapsed {
                *elapsed = deadline;
            }
        }
    }

    /// Real instant corresponding to a loop-relative deadline, for waiting.
    /// `None` for a virtual clock.
    pub fn instant_at(&self, deadline: Duration) -> Option<Instant> {
        match self {
            Self::Virtual { .. } => None,
            Self::Wall { origin } => Some(*origin + deadline),
        }
    }

    /// Whether this clock is virtual.
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }
}
