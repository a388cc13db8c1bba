/// Process-wide "do not disturb" window.
///
/// There is only ever one window: a new request replaces whatever time was
/// left on the previous one.
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

use crate::surface::Indicator;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MuteError {
    #[error("mute duration of {secs}s is out of range")]
    OutOfRange { secs: u64 },
}

pub struct MuteController {
    until: Option<Instant>,
    indicator: Box<dyn Indicator>,
}

impl MuteController {
    pub fn new(indicator: Box<dyn Indicator>) -> Self {
        Self {
            until: None,
            indicator,
        }
    }

    /// Starts a new window.  A duration that cannot be represented as a
    /// deadline is refused and leaves any current window untouched.
    pub fn request_mute(&mut self, duration: Duration, now: Instant) -> Result<(), MuteError> {
        let until = now.checked_add(duration).ok_or(MuteError::OutOfRange {
            secs: duration.as_secs(),
        })?;
        self.until = Some(until);
        self.indicator.show(duration);
        info!(secs = duration.as_secs(), "Notifications muted");
        Ok(())
    }

    /// Time left in the current window, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn unmute(&mut self) {
        if self.until.take().is_some() {
            self.indicator.hide();
            info!("Notifications unmuted");
        }
    }

    pub fn is_muted(&mut self, now: Instant) -> bool {
        self.tick(now);
        self.until.is_some()
    }

    /// Ends the window once its deadline has passed.
    pub fn tick(&mut self, now: Instant) {
        if self.until.is_some_and(|until| now >= until) {
            self.until = None;
            self.indicator.hide();
            info!("Mute expired");
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.until
    }
}
