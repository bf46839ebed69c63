//! Interval timer for repeating time-based operations.
//!
//! An [`Interval`] yields at a fixed period. It is polled with the current
//! instant rather than sleeping itself, so the caller decides how to wait
//! (the rate limiter's replenishment thread parks for
//! [`remaining`](Interval::remaining)).
//!
//! # Missed Ticks
//!
//! When the caller falls behind (e.g., the thread was descheduled for
//! longer than a period), missed ticks are skipped: one tick fires and the
//! next deadline realigns to the period grid.

use std::time::{Duration, Instant};

/// A repeating interval timer.
///
/// The first tick is due one period after the start instant.
#[derive(Debug, Clone)]
pub struct Interval {
    /// The next tick deadline.
    deadline: Instant,
    /// The period between ticks.
    period: Duration,
}

impl Interval {
    /// Creates a new interval whose first tick is due at `start + period`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    #[must_use]
    pub fn new(start: Instant, period: Duration) -> Self {
        assert!(!period.is_zero(), "interval period must be non-zero");
        Self {
            deadline: start + period,
            period,
        }
    }

    /// Returns the period between ticks.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Returns the next tick deadline.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the tick deadline if it has passed, advancing to the next one.
    ///
    /// Returns `None` if `now` is before the deadline.
    pub fn poll_tick(&mut self, now: Instant) -> Option<Instant> {
        if now >= self.deadline {
            let tick_time = self.deadline;
            self.advance_deadline(now);
            Some(tick_time)
        } else {
            None
        }
    }

    /// Returns the remaining time until the next tick.
    ///
    /// Returns `Duration::ZERO` if the deadline has passed.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Changes the period. The next deadline is recomputed from `now`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn set_period(&mut self, now: Instant, period: Duration) {
        assert!(!period.is_zero(), "interval period must be non-zero");
        self.period = period;
        self.deadline = now + period;
    }

    fn advance_deadline(&mut self, now: Instant) {
        let behind = now.saturating_duration_since(self.deadline).as_nanos();
        let periods_to_skip = behind / self.period.as_nanos() + 1;
        let skip = u32::try_from(periods_to_skip).unwrap_or(u32::MAX);
        self.deadline += self.period.saturating_mul(skip);
    }
}
