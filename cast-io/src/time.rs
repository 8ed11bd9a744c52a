//! Timer utilities
//!
//! Deadline timers for periodic sender work (resend checks, RTCP reports).
//! Timers hold no thread or callback: the owner polls them with the current
//! time, so a timer can never fire after its owner is gone.

use std::time::{Duration, Instant};

/// Smallest delay a timer will be armed with
pub const MIN_SCHEDULING_DELAY: Duration = Duration::from_millis(1);

/// One-shot, re-armable deadline timer
#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Create a disarmed timer
    pub fn new() -> Self {
        Timer { deadline: None }
    }

    /// Arm the timer to fire `delay` after `now`
    ///
    /// Delays shorter than [`MIN_SCHEDULING_DELAY`] are rounded up.
    pub fn arm_after(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay.max(MIN_SCHEDULING_DELAY));
    }

    /// Arm the timer to fire at `deadline`, but no sooner than the minimum
    /// scheduling delay after `now`
    pub fn arm_at(&mut self, now: Instant, deadline: Instant) {
        self.arm_after(now, deadline.saturating_duration_since(now));
    }

    /// Disarm the timer
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Check if the timer is armed
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the timer will fire, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check if the timer has expired
    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fire the timer if expired, returning true if it fired
    ///
    /// A fired timer is disarmed; the owner re-arms it as needed.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.expired(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

/// Earliest of several optional deadlines
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}
