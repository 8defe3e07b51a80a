//! Throttle window.

use std::time::Duration;
use tokio::time::Instant;

/// Cool-down during which no call is dispatched.
///
/// Engaging while already active overwrites the window.
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    pub active: bool,
    pub until: Option<Instant>,
    pub reason: Option<String>,
}

impl ThrottleState {
    pub fn engage(&mut self, now: Instant, duration: Duration, reason: impl Into<String>) {
        self.active = true;
        self.until = Some(now + duration);
        self.reason = Some(reason.into());
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.until = None;
        self.reason = None;
    }

    /// Time left in an active window; `None` when clear or elapsed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if !self.active {
            return None;
        }
        self.until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Active but past its end; the next gate check clears it.
    pub fn is_elapsed(&self, now: Instant) -> bool {
        self.active && self.remaining(now).is_none()
    }
}
