//! Randomized exponential backoff for [`PolicyKind::Backoff`].
//!
//! The delay ceiling grows by `multiplier` per failed attempt up to `max`;
//! each delay is drawn uniformly from the upper half of the ceiling so that
//! agents that collided once are unlikely to collide again in lockstep.
//!
//! [`PolicyKind::Backoff`]: super::PolicyKind::Backoff

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::{Duration, Instant};

use crate::config::BackoffConfig;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::sync::wait_queue::{self, Waiter, Wake};

/// xorshift64 generator for jitter. Not cryptographically secure.
#[derive(Debug, Clone)]
struct JitterRng {
    state: u64,
}

impl JitterRng {
    const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn from_entropy() -> Self {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(0x9e37_79b9_7f4a_7c15);
        Self::new(hasher.finish())
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in `[0, bound]`.
    fn next_inclusive(&mut self, bound: u64) -> u64 {
        match bound.checked_add(1) {
            Some(span) => self.next_u64() % span,
            None => self.next_u64(),
        }
    }
}

/// Backoff state for one acquisition episode.
#[derive(Debug, Clone)]
pub(super) struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    rng: JitterRng,
}

impl Backoff {
    pub(super) fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng: JitterRng::from_entropy(),
        }
    }

    #[cfg(test)]
    fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            attempt: 0,
            rng: JitterRng::new(seed),
        }
    }

    pub(super) fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Current ceiling: `initial * multiplier^attempt`, capped at `max`.
    fn ceiling(&self) -> Duration {
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let secs = self.config.initial.as_secs_f64() * self.config.multiplier.powi(exponent);
        if secs.is_finite() && secs < self.config.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.config.max
        }
    }

    /// Draws the next delay and advances the attempt counter.
    pub(super) fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        let ceiling_nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        let half = ceiling_nanos / 2;
        Duration::from_nanos(half + self.rng.next_inclusive(ceiling_nanos - half))
    }

    /// Sleeps for the next delay, waking early on cancellation. Never
    /// sleeps past `deadline`.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `TimedOut` (from `cx` or `deadline`).
    pub(super) fn wait(&mut self, deadline: Option<Instant>, cx: &Cx) -> Result<()> {
        let delay = self.next_delay();
        let wake_at = Instant::now().checked_add(delay);
        let until = match (wake_at, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        tracing::trace!(attempt = self.attempt, ?delay, "backing off");
        let sleeper = Waiter::detached();
        if wait_queue::park(&sleeper, until, Some(cx)) == Wake::Cancelled {
            return Err(Error::cancelled());
        }
        cx.checkpoint()?;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::timed_out());
        }
        Ok(())
    }
}
