//! Time sources and interval timers.
//!
//! Components that reason about windows of time (the rate limiter) read the
//! current instant through a [`TimeSource`] so tests can substitute a
//! [`VirtualClock`] and advance it by hand.

mod interval;

pub use interval::Interval;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic instants.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Returns true if this source advances with real time, so a thread
    /// sleeping on the OS clock stays in step with it.
    fn tracks_wall_time(&self) -> bool {
        false
    }
}

/// Real monotonic time backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl WallClock {
    /// Creates a wall clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn tracks_wall_time(&self) -> bool {
        true
    }
}

/// A manually advanced clock for deterministic tests.
///
/// The clock starts at the instant it was created and only moves when
/// [`advance`](Self::advance) is called.
#[derive(Debug)]
pub struct VirtualClock {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::Acquire))
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_only_moves_when_advanced() {
        let clock = VirtualClock::new();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.tracks_wall_time());
        assert!(!VirtualClock::new().tracks_wall_time());
    }
}
