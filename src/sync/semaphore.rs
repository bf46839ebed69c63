//! Counting semaphore with FIFO hand-off.
//!
//! A semaphore controls access to a finite number of resources through
//! permits. Acquired permits are either scoped ([`SemaphorePermit`], released
//! on drop) or raw ([`Semaphore::down`] / [`Semaphore::up`]).
//!
//! # Fairness
//!
//! Permits are granted strictly in arrival order. A waiter that needs more
//! permits than are currently free blocks every waiter behind it, and a
//! newcomer never takes permits while anyone is queued. No waiter can be
//! skipped indefinitely by later arrivals.
//!
//! # Cancel Safety
//!
//! - Timeout or cancellation while waiting: the waiter leaves the queue and
//!   no permit is consumed.
//! - Permit held across a panic: the permit is released during unwinding.
//!
//! # Example
//!
//! ```
//! use turnstile::sync::Semaphore;
//!
//! let sem = Semaphore::new(2)?;
//! let a = sem.acquire()?;
//! let _b = sem.acquire()?;
//! assert_eq!(sem.available_permits(), 0);
//! assert!(sem.try_acquire().is_err());
//! drop(a);
//! assert_eq!(sem.available_permits(), 1);
//! # Ok::<(), turnstile::Error>(())
//! ```

use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::wait_queue::{self, WaitQueue, Waiter, Wake, Woken};
use crate::cx::Cx;
use crate::error::{Error, Result};

/// A counting semaphore for limiting concurrent access.
#[derive(Debug)]
pub struct Semaphore {
    /// Internal state for permits and waiters.
    state: ParkingMutex<SemaphoreState>,
    /// Lock-free shadow of available permits for read-heavy diagnostics.
    permits_shadow: AtomicUsize,
    /// Lock-free shadow of closed state for read-heavy checks.
    closed_shadow: AtomicBool,
}

#[derive(Debug)]
struct SemaphoreState {
    /// Number of available permits.
    permits: usize,
    /// Permits acquired and not yet released.
    outstanding: usize,
    /// Capacity. `permits + outstanding <= max_permits`.
    max_permits: usize,
    /// Whether the semaphore is closed.
    closed: bool,
    /// Queue of waiters.
    waiters: WaitQueue,
}

impl SemaphoreState {
    fn take(&mut self, count: usize) {
        self.permits -= count;
        self.outstanding += count;
    }

    /// Grants front waiters while their requests fit.
    fn dispatch(&mut self) -> Woken {
        let mut woken = Woken::new();
        while !self.closed {
            let Some(want) = self.waiters.front_want() else {
                break;
            };
            if want > self.permits {
                break;
            }
            self.take(want);
            if let Some(waiter) = self.waiters.grant_front() {
                woken.push(waiter);
            }
        }
        woken
    }
}

impl Semaphore {
    /// Creates a new semaphore with `permits` permits, all available.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidCapacity`](crate::ErrorKind::InvalidCapacity)
    /// if `permits` is zero.
    pub fn new(permits: usize) -> Result<Self> {
        Self::with_limit(permits, permits)
    }

    /// Creates a semaphore with capacity `max_permits` of which only
    /// `initial` are available; the rest count as outstanding and can be
    /// returned with [`up`](Self::up).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidCapacity`](crate::ErrorKind::InvalidCapacity)
    /// if `max_permits` is zero or `initial > max_permits`.
    pub fn with_limit(initial: usize, max_permits: usize) -> Result<Self> {
        if max_permits == 0 {
            return Err(Error::invalid_capacity("semaphore capacity", max_permits));
        }
        if initial > max_permits {
            return Err(Error::invalid_capacity("semaphore capacity", max_permits)
                .with_message(format!(
                    "initial permits {initial} exceed capacity {max_permits}"
                )));
        }
        Ok(Self {
            state: ParkingMutex::new(SemaphoreState {
                permits: initial,
                outstanding: max_permits - initial,
                max_permits,
                closed: false,
                waiters: WaitQueue::new(),
            }),
            permits_shadow: AtomicUsize::new(initial),
            closed_shadow: AtomicBool::new(false),
        })
    }

    /// Returns the number of currently available permits.
    ///
    /// This is a snapshot; it may be stale by the time the caller reads it.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        // Relaxed: advisory only, the real count is protected by the lock.
        self.permits_shadow.load(Ordering::Relaxed)
    }

    /// Returns the capacity.
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.state.lock().max_permits
    }

    /// Returns the number of permits acquired and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Returns the number of workers blocked in acquire.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns true if the semaphore is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_shadow.load(Ordering::Acquire)
    }

    /// Closes the semaphore. Blocked and future acquires fail with
    /// [`ErrorKind::Closed`](crate::ErrorKind::Closed); releases are still
    /// accepted.
    pub fn close(&self) {
        let woken = {
            let mut state = self.state.lock();
            state.closed = true;
            self.closed_shadow.store(true, Ordering::Release);
            state.waiters.close_all()
        };
        tracing::debug!(woken = woken.len(), "semaphore closed");
        wait_queue::wake_all(woken);
    }

    /// Acquires one permit, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Fails only if the semaphore is closed.
    pub fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.acquire_many(1)
    }

    /// Acquires `count` permits at once, blocking until all are available.
    ///
    /// # Errors
    ///
    /// `Closed` after shutdown; `InvalidCapacity` if `count` is zero or
    /// larger than the capacity.
    pub fn acquire_many(&self, count: usize) -> Result<SemaphorePermit<'_>> {
        self.acquire_inner(count, None, None)?;
        Ok(SemaphorePermit {
            semaphore: self,
            count,
        })
    }

    /// Acquires one permit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut` if no permit was granted in time; `Closed` after shutdown.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<SemaphorePermit<'_>> {
        self.acquire_inner(1, Instant::now().checked_add(timeout), None)?;
        Ok(SemaphorePermit {
            semaphore: self,
            count: 1,
        })
    }

    /// Acquires one permit under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `TimedOut` from `cx`; `Closed` after shutdown.
    pub fn acquire_with(&self, cx: &Cx) -> Result<SemaphorePermit<'_>> {
        self.acquire_inner(1, None, Some(cx))?;
        Ok(SemaphorePermit {
            semaphore: self,
            count: 1,
        })
    }

    /// Tries to acquire one permit without waiting.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if no permit is free or other workers are queued;
    /// `Closed` after shutdown.
    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.try_acquire_many(1)
    }

    /// Tries to acquire `count` permits without waiting.
    ///
    /// # Errors
    ///
    /// See [`try_acquire`](Self::try_acquire).
    pub fn try_acquire_many(&self, count: usize) -> Result<SemaphorePermit<'_>> {
        if count == 0 {
            return Err(Error::invalid_capacity("permit count", count));
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed());
        }
        // Strict FIFO: never overtake a queued waiter.
        if !state.waiters.is_empty() || state.permits < count {
            return Err(Error::would_block());
        }
        state.take(count);
        self.sync_shadow(&state);
        drop(state);
        Ok(SemaphorePermit {
            semaphore: self,
            count,
        })
    }

    /// Raw acquire of one permit (`P`/`down`). Release it with [`up`](Self::up).
    ///
    /// # Errors
    ///
    /// Fails only if the semaphore is closed.
    pub fn down(&self) -> Result<()> {
        self.acquire_inner(1, None, None)
    }

    /// Raw acquire bounded by `timeout`. Returns whether a permit was taken.
    /// A timed-out call leaves no trace on the semaphore.
    #[must_use]
    pub fn down_timeout(&self, timeout: Duration) -> bool {
        self.acquire_inner(1, Instant::now().checked_add(timeout), None)
            .is_ok()
    }

    /// Raw acquire under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut` or `Closed`.
    pub fn down_with(&self, cx: &Cx) -> Result<()> {
        self.acquire_inner(1, None, Some(cx))
    }

    /// Raw release of one permit (`V`/`up`), waking the front waiter if its
    /// request now fits.
    ///
    /// # Errors
    ///
    /// `NotOwned` if there is no outstanding permit to return.
    pub fn up(&self) -> Result<()> {
        self.release_inner(1)
    }

    /// Alias of [`up`](Self::up).
    ///
    /// # Errors
    ///
    /// See [`up`](Self::up).
    pub fn release(&self) -> Result<()> {
        self.up()
    }

    /// Changes the capacity. Growing adds free permits; shrinking clamps the
    /// available count immediately so that `available + outstanding` never
    /// exceeds the new capacity. Queued requests larger than the new
    /// capacity fail with `InvalidCapacity`.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `max_permits` is zero.
    pub fn set_max_permits(&self, max_permits: usize) -> Result<()> {
        if max_permits == 0 {
            return Err(Error::invalid_capacity("semaphore capacity", max_permits));
        }
        let woken = {
            let mut state = self.state.lock();
            let old = state.max_permits;
            state.max_permits = max_permits;
            // Holders beyond a reduced capacity keep their permits, so a
            // later grow only frees what fits beside them.
            let ceiling = max_permits.saturating_sub(state.outstanding);
            state.permits = if max_permits >= old {
                (state.permits + (max_permits - old)).min(ceiling)
            } else {
                state.permits.min(ceiling)
            };
            let mut woken = state.waiters.reject_oversized(max_permits);
            woken.extend(state.dispatch());
            self.sync_shadow(&state);
            tracing::debug!(
                old,
                new = max_permits,
                available = state.permits,
                "semaphore capacity changed"
            );
            woken
        };
        wait_queue::wake_all(woken);
        Ok(())
    }

    /// Removes up to `count` available permits, returning how many were
    /// removed. Removed permits count as outstanding until returned with
    /// [`up`](Self::up).
    pub fn forget_permits(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let removed = count.min(state.permits);
        state.take(removed);
        self.sync_shadow(&state);
        removed
    }

    fn sync_shadow(&self, state: &SemaphoreState) {
        self.permits_shadow.store(state.permits, Ordering::Relaxed);
    }

    pub(crate) fn acquire_inner(
        &self,
        count: usize,
        deadline: Option<Instant>,
        cx: Option<&Cx>,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid_capacity("permit count", count));
        }
        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::closed());
            }
            if let Some(cx) = cx {
                cx.checkpoint()?;
            }
            if count > state.max_permits {
                return Err(Error::invalid_capacity("permit count", count).with_message(
                    format!(
                        "requested {count} permits from a semaphore of capacity {}",
                        state.max_permits
                    ),
                ));
            }
            if state.waiters.is_empty() && state.permits >= count {
                state.take(count);
                self.sync_shadow(&state);
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::timed_out());
            }
            state.waiters.push(count)
        };

        tracing::trace!(waiter = waiter.id(), count, "semaphore acquire waiting");
        match wait_queue::park(&waiter, deadline, cx) {
            Wake::Granted => Ok(()),
            Wake::Closed | Wake::Rejected => Err(wake_error(&waiter)),
            wake => self.abandon(&waiter, wake),
        }
    }

    /// Removes a waiter that timed out or was cancelled.
    fn abandon(&self, waiter: &Waiter, wake: Wake) -> Result<()> {
        let woken = {
            let mut state = self.state.lock();
            if !state.waiters.remove(waiter.id()) {
                drop(state);
                // Granted (or closed) before we got the lock back.
                return match waiter.settled() {
                    Some(Wake::Granted) => Ok(()),
                    _ => Err(wake_error(waiter)),
                };
            }
            // Leaving from the front may unblock smaller requests behind us.
            let woken = state.dispatch();
            self.sync_shadow(&state);
            woken
        };
        tracing::trace!(waiter = waiter.id(), ?wake, "semaphore waiter abandoned");
        wait_queue::wake_all(woken);
        Err(wake.into_error())
    }

    fn release_inner(&self, count: usize) -> Result<()> {
        let woken = {
            let mut state = self.state.lock();
            if state.outstanding < count {
                tracing::warn!(
                    outstanding = state.outstanding,
                    count,
                    "semaphore release without a matching acquire"
                );
                return Err(Error::not_owned("semaphore permit"));
            }
            state.outstanding -= count;
            let ceiling = state.max_permits.saturating_sub(state.outstanding);
            state.permits = (state.permits + count).min(ceiling);
            let woken = state.dispatch();
            self.sync_shadow(&state);
            woken
        };
        wait_queue::wake_all(woken);
        Ok(())
    }
}

/// Error for a waiter settled by the other side without a grant.
fn wake_error(waiter: &Waiter) -> Error {
    waiter
        .settled()
        .map_or_else(Error::closed, Wake::into_error)
}

/// A scoped permit from a semaphore, released on drop.
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
    count: usize,
}

impl SemaphorePermit<'_> {
    /// Returns the number of permits held.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Detaches the permit from scope. It stays outstanding until returned
    /// with [`Semaphore::up`].
    pub fn forget(self) {
        let _ = std::mem::ManuallyDrop::new(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        let released = self.semaphore.release_inner(self.count);
        debug_assert!(released.is_ok(), "scoped permit always has an outstanding count");
    }
}
