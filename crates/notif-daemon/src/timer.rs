/// Pausable single-shot deadline.
///
/// Timers are plain data: the owner asks for `deadline()` and the core loop
/// sleeps until the earliest one, then calls back with the current instant.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissTimer {
    Running { deadline: Instant },
    Paused { remaining: Duration },
    Cancelled,
}

impl DismissTimer {
    pub fn start(now: Instant, duration: Duration) -> Self {
        DismissTimer::Running {
            deadline: now + duration,
        }
    }

    /// Freezes the timer, capturing what is left.  No-op unless running.
    pub fn pause(&mut self, now: Instant) {
        if let DismissTimer::Running { deadline } = *self {
            *self = DismissTimer::Paused {
                remaining: deadline.saturating_duration_since(now),
            };
        }
    }

    /// Restarts a paused timer with exactly the captured remaining time.
    pub fn resume(&mut self, now: Instant) {
        if let DismissTimer::Paused { remaining } = *self {
            *self = DismissTimer::Running {
                deadline: now + remaining,
            };
        }
    }

    pub fn cancel(&mut self) {
        *self = DismissTimer::Cancelled;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            DismissTimer::Running { deadline } => Some(*deadline),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, DismissTimer::Paused { .. })
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }
}
