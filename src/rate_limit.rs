//! Sliding-window rate limiter.
//!
//! A [`RateLimiter`] admits at most `capacity` callers in any window of
//! length `window`. It is a [`Semaphore`] whose permits are not returned by
//! the caller: each admission is logged with its timestamp, and a permit
//! comes back only once that admission has aged out of the window.
//!
//! Replenishment runs on a background timer thread that ticks every
//! `window / capacity` ([`ReplenishMode::Steady`]) or every `window`
//! ([`ReplenishMode::Batch`]). [`RateLimiter::try_acquire`] also
//! replenishes lazily when it finds no permit, and
//! [`RateLimiter::replenish`] can be called directly, which together with a
//! [`VirtualClock`](crate::time::VirtualClock) makes the limiter fully
//! deterministic in tests.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use turnstile::rate_limit::RateLimiter;
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(60))?;
//! assert!(limiter.try_acquire());
//! assert!(limiter.try_acquire());
//! assert!(!limiter.try_acquire());
//! # Ok::<(), turnstile::Error>(())
//! ```

use parking_lot::Mutex as ParkingMutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::RateLimiterConfig;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::{Semaphore, SemaphorePermit};
use crate::time::{Interval, TimeSource, WallClock};

/// How often the replenishment timer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplenishMode {
    /// Tick every `window / capacity`, returning permits as soon as their
    /// admissions age out.
    #[default]
    Steady,
    /// Tick once per window, returning aged-out permits in a batch.
    Batch,
}

impl fmt::Display for ReplenishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steady => write!(f, "steady"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for ReplenishMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "steady" => Ok(Self::Steady),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown replenish mode {other:?}")),
        }
    }
}

#[derive(Debug)]
struct Shared {
    permits: Semaphore,
    /// Admission timestamps, oldest first.
    admissions: ParkingMutex<VecDeque<Instant>>,
    window: Duration,
    mode: ReplenishMode,
    clock: Arc<dyn TimeSource>,
    /// Timer period in nanoseconds; follows capacity changes.
    period_nanos: AtomicU64,
    shutdown: AtomicBool,
}

impl Shared {
    fn period_for(&self, capacity: usize) -> Duration {
        match self.mode {
            ReplenishMode::Steady => {
                let divisor = u32::try_from(capacity).unwrap_or(u32::MAX).max(1);
                (self.window / divisor).max(Duration::from_nanos(1))
            }
            ReplenishMode::Batch => self.window,
        }
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::Acquire))
    }

    fn admit(&self) {
        let now = self.clock.now();
        self.admissions.lock().push_back(now);
    }

    fn replenish(&self) -> usize {
        let expired = {
            let mut admissions = self.admissions.lock();
            let now = self.clock.now();
            let mut expired = 0;
            while admissions
                .front()
                .is_some_and(|&at| now.saturating_duration_since(at) >= self.window)
            {
                admissions.pop_front();
                expired += 1;
            }
            expired
        };
        for _ in 0..expired {
            let returned = self.permits.up();
            debug_assert!(returned.is_ok(), "every admission holds one permit");
        }
        if expired > 0 {
            tracing::trace!(restored = expired, "rate limiter replenished");
        }
        expired
    }
}

/// Admits at most `capacity` callers per sliding `window`.
#[derive(Debug)]
pub struct RateLimiter {
    shared: Arc<Shared>,
    timer: ParkingMutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a limiter on the wall clock with a steady replenishment
    /// timer.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `capacity` is zero or `window` is zero.
    pub fn new(capacity: usize, window: Duration) -> Result<Self> {
        Self::with_config(&RateLimiterConfig {
            capacity,
            window,
            ..RateLimiterConfig::default()
        })
    }

    /// Creates a limiter from its configuration section.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_config(config: &RateLimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(WallClock::new()))
    }

    /// Creates a limiter that reads time from `clock`.
    ///
    /// The background timer sleeps on the OS clock, so it is only available
    /// with a source that [tracks wall time](TimeSource::tracks_wall_time).
    /// A [`VirtualClock`](crate::time::VirtualClock) limiter is driven by
    /// [`replenish`](Self::replenish) and lazy replenishment instead.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new); `InvalidConfig` if `background_timer` is set
    /// for a clock that does not track wall time.
    pub fn with_clock(config: &RateLimiterConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        if config.window.is_zero() {
            return Err(Error::new(ErrorKind::InvalidCapacity)
                .with_message("rate limit window must be positive"));
        }
        if config.background_timer && !clock.tracks_wall_time() {
            return Err(Error::new(ErrorKind::InvalidConfig).with_message(
                "the replenishment timer needs a wall-clock time source; \
                 disable background_timer and call replenish()",
            ));
        }
        let permits = Semaphore::new(config.capacity)
            .map_err(|_| Error::invalid_capacity("rate limit capacity", config.capacity))?;
        let shared = Arc::new(Shared {
            permits,
            admissions: ParkingMutex::new(VecDeque::with_capacity(config.capacity)),
            window: config.window,
            mode: config.replenish,
            clock,
            period_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        store_period(&shared, shared.period_for(config.capacity));

        let timer = if config.background_timer {
            spawn_timer(&shared)
        } else {
            None
        };
        tracing::debug!(
            capacity = config.capacity,
            window = ?config.window,
            mode = %config.replenish,
            timer = timer.is_some(),
            "rate limiter started"
        );
        Ok(Self {
            shared,
            timer: ParkingMutex::new(timer),
        })
    }

    /// Admits the caller if a permit is available right now.
    pub fn try_acquire(&self) -> bool {
        let attempt = |permits: &Semaphore| permits.try_acquire().map(SemaphorePermit::forget);
        let admitted = match attempt(&self.shared.permits) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                self.shared.replenish() > 0 && attempt(&self.shared.permits).is_ok()
            }
            Err(_) => false,
        };
        if admitted {
            self.shared.admit();
        }
        admitted
    }

    /// Blocks until admitted.
    ///
    /// # Errors
    ///
    /// `Closed` after [`shutdown`](Self::shutdown).
    pub fn acquire(&self) -> Result<()> {
        self.acquire_inner(None, None)
    }

    /// Blocks until admitted or `timeout` passes.
    ///
    /// # Errors
    ///
    /// `TimedOut` or `Closed`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<()> {
        self.acquire_inner(Instant::now().checked_add(timeout), None)
    }

    /// Blocks until admitted, observing `cx`.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut` or `Closed`.
    pub fn acquire_with(&self, cx: &Cx) -> Result<()> {
        self.acquire_inner(None, Some(cx))
    }

    fn acquire_inner(&self, deadline: Option<Instant>, cx: Option<&Cx>) -> Result<()> {
        self.shared.permits.acquire_inner(1, deadline, cx)?;
        self.shared.admit();
        Ok(())
    }

    /// Returns permits for admissions older than the window. Returns how
    /// many were restored.
    pub fn replenish(&self) -> usize {
        self.shared.replenish()
    }

    /// Changes the capacity. Shrinking takes effect immediately: no new
    /// admission happens until the admissions in the window drop below the
    /// new capacity.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `capacity` is zero.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        self.shared.permits.set_max_permits(capacity)?;
        store_period(&self.shared, self.shared.period_for(capacity));
        Ok(())
    }

    /// Permits available right now. A snapshot.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.permits.available_permits()
    }

    /// Admissions allowed per window.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.permits.max_permits()
    }

    /// The window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Admissions within the last window.
    #[must_use]
    pub fn admissions_in_window(&self) -> usize {
        let now = self.shared.clock.now();
        self.shared
            .admissions
            .lock()
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < self.shared.window)
            .count()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops the timer thread and closes the limiter. Blocked acquirers
    /// receive `Closed`.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.permits.close();
        if let Some(handle) = self.timer.lock().take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("rate limiter timer thread panicked");
            }
        }
        tracing::debug!("rate limiter shut down");
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn store_period(shared: &Shared, period: Duration) {
    let nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
    shared.period_nanos.store(nanos, Ordering::Release);
}

fn spawn_timer(shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("turnstile-replenish".into())
        .spawn(move || run_timer(&shared));
    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "replenishment timer unavailable, replenishing lazily");
            None
        }
    }
}

fn run_timer(shared: &Shared) {
    let mut interval = Interval::new(Instant::now(), shared.period());
    while !shared.shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        let period = shared.period();
        if period != interval.period() {
            interval.set_period(now, period);
        }
        if interval.poll_tick(now).is_some() {
            shared.replenish();
            continue;
        }
        thread::park_timeout(interval.remaining(now));
    }
    tracing::trace!("replenishment timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::time::VirtualClock;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn manual(capacity: usize, window: Duration) -> (RateLimiter, Arc<VirtualClock>) {
        let clock = Arc::new(VirtualClock::new());
        let config = RateLimiterConfig {
            capacity,
            window,
            replenish: ReplenishMode::Steady,
            background_timer: false,
        };
        let limiter = RateLimiter::with_clock(&config, clock.clone()).expect("limiter");
        (limiter, clock)
    }

    #[test]
    fn invalid_parameters_rejected() {
        init_test("invalid_parameters_rejected");
        let err = RateLimiter::new(0, Duration::from_secs(1)).expect_err("zero capacity");
        crate::assert_with_log!(
            err.kind() == ErrorKind::InvalidCapacity,
            "zero capacity",
            ErrorKind::InvalidCapacity,
            err.kind()
        );
        let err = RateLimiter::new(1, Duration::ZERO).expect_err("zero window");
        assert_eq!(err.kind(), ErrorKind::InvalidCapacity);
        crate::test_complete!("invalid_parameters_rejected");
    }

    #[test]
    fn timer_with_virtual_clock_rejected() {
        init_test("timer_with_virtual_clock_rejected");
        let config = RateLimiterConfig {
            capacity: 2,
            window: Duration::from_secs(1),
            replenish: ReplenishMode::Steady,
            background_timer: true,
        };
        let err = RateLimiter::with_clock(&config, Arc::new(VirtualClock::new()))
            .expect_err("timer cannot follow virtual time");
        crate::assert_with_log!(
            err.kind() == ErrorKind::InvalidConfig,
            "kind",
            ErrorKind::InvalidConfig,
            err.kind()
        );
        let limiter = RateLimiter::with_clock(&config, Arc::new(WallClock::new())).expect("wall clock");
        assert!(limiter.try_acquire());
        crate::test_complete!("timer_with_virtual_clock_rejected");
    }

    #[test]
    fn admits_capacity_then_refuses() {
        init_test("admits_capacity_then_refuses");
        let (limiter, _clock) = manual(3, Duration::from_secs(1));
        let admitted = (0..5).filter(|_| limiter.try_acquire()).count();
        crate::assert_with_log!(admitted == 3, "admitted", 3usize, admitted);
        assert_eq!(limiter.available(), 0);
        assert_eq!(limiter.admissions_in_window(), 3);
        crate::test_complete!("admits_capacity_then_refuses");
    }

    #[test]
    fn permits_return_only_after_window() {
        init_test("permits_return_only_after_window");
        let (limiter, clock) = manual(2, Duration::from_secs(10));
        assert!(limiter.try_acquire());
        clock.advance(Duration::from_secs(4));
        assert!(limiter.try_acquire());

        clock.advance(Duration::from_secs(5));
        let restored = limiter.replenish();
        crate::assert_with_log!(restored == 0, "nothing aged out", 0usize, restored);
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(1));
        let restored = limiter.replenish();
        crate::assert_with_log!(restored == 1, "first admission aged out", 1usize, restored);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        crate::test_complete!("permits_return_only_after_window");
    }

    #[test]
    fn try_acquire_replenishes_lazily() {
        init_test("try_acquire_replenishes_lazily");
        let (limiter, clock) = manual(1, Duration::from_millis(100));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(100));
        let admitted = limiter.try_acquire();
        crate::assert_with_log!(admitted, "admitted after window", true, admitted);
        crate::test_complete!("try_acquire_replenishes_lazily");
    }

    #[test]
    fn shrinking_capacity_applies_immediately() {
        init_test("shrinking_capacity_applies_immediately");
        let (limiter, clock) = manual(4, Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        limiter.set_capacity(2).expect("shrink");
        crate::assert_with_log!(limiter.available() == 0, "clamped", 0usize, limiter.available());
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(1));
        limiter.replenish();
        assert_eq!(limiter.available(), 2);
        assert_eq!(limiter.capacity(), 2);
        crate::test_complete!("shrinking_capacity_applies_immediately");
    }

    #[test]
    fn blocked_acquire_is_released_by_replenish() {
        init_test("blocked_acquire_is_released_by_replenish");
        let (limiter, clock) = manual(1, Duration::from_secs(1));
        let limiter = Arc::new(limiter);
        assert!(limiter.try_acquire());
        let handle = {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.acquire())
        };
        wait_until(|| limiter.shared.permits.waiters() == 1);
        clock.advance(Duration::from_secs(1));
        limiter.replenish();
        handle.join().expect("acquirer").expect("admitted");
        assert_eq!(limiter.admissions_in_window(), 1);
        crate::test_complete!("blocked_acquire_is_released_by_replenish");
    }

    #[test]
    fn shutdown_wakes_blocked_acquirer() {
        init_test("shutdown_wakes_blocked_acquirer");
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(3600)).expect("limiter"));
        assert!(limiter.try_acquire());
        let handle = {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.acquire())
        };
        wait_until(|| limiter.shared.permits.waiters() == 1);
        limiter.shutdown();
        let err = handle.join().expect("acquirer").expect_err("closed");
        crate::assert_with_log!(err.is_closed(), "closed", true, err.is_closed());
        assert!(limiter.is_shutdown());
        assert!(!limiter.try_acquire());
        crate::test_complete!("shutdown_wakes_blocked_acquirer");
    }

    #[test]
    fn background_timer_restores_after_window() {
        init_test("background_timer_restores_after_window");
        let window = Duration::from_millis(60);
        let limiter = RateLimiter::new(2, window).expect("limiter");
        let start = Instant::now();
        limiter.acquire().expect("first");
        limiter.acquire().expect("second");
        limiter
            .acquire_timeout(Duration::from_secs(5))
            .expect("third after replenish");
        let elapsed = start.elapsed();
        crate::assert_with_log!(elapsed >= window, "waited a window", window, elapsed);
        crate::test_complete!("background_timer_restores_after_window");
    }

    #[test]
    fn mode_parses() {
        init_test("mode_parses");
        assert_eq!("Batch".parse(), Ok(ReplenishMode::Batch));
        assert!("bursty".parse::<ReplenishMode>().is_err());
        crate::test_complete!("mode_parses");
    }
}
