//! Fair mutex with ownership checks.
//!
//! [`RawMutex`] is the bare lock: `acquire` / `release` with the owning
//! thread recorded, so a release from the wrong thread, a double release or a
//! release without acquire is reported as [`ErrorKind::NotOwned`] instead of
//! corrupting the lock. [`Mutex<T>`] wraps a value behind a `RawMutex` and
//! hands out scoped guards.
//!
//! # Fairness
//!
//! Ownership passes directly from the releasing thread to the longest
//! waiter. A thread arriving between the release and the waiter's wakeup
//! finds the lock already owned and queues behind it.
//!
//! # Poisoning
//!
//! A [`MutexGuard`] dropped during a panic poisons its `Mutex`. Later `lock`
//! calls fail with [`ErrorKind::Poisoned`] until [`Mutex::clear_poison`].
//!
//! # Example
//!
//! ```
//! use turnstile::sync::Mutex;
//!
//! let mutex = Mutex::new(41);
//! {
//!     let mut guard = mutex.lock()?;
//!     *guard += 1;
//! }
//! assert_eq!(mutex.into_inner(), 42);
//! # Ok::<(), turnstile::Error>(())
//! ```
//!
//! [`ErrorKind::NotOwned`]: crate::ErrorKind::NotOwned
//! [`ErrorKind::Poisoned`]: crate::ErrorKind::Poisoned

#![allow(unsafe_code)]

use parking_lot::Mutex as ParkingMutex;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::wait_queue::{self, WaitQueue, Waiter, Wake};
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};

/// A binary lock owned by at most one thread.
#[derive(Debug, Default)]
pub struct RawMutex {
    state: ParkingMutex<RawState>,
}

#[derive(Debug, Default)]
struct RawState {
    owner: Option<ThreadId>,
    waiters: WaitQueue,
}

impl RawMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParkingMutex::new(RawState {
                owner: None,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Blocks until the lock is free, then takes ownership.
    ///
    /// # Errors
    ///
    /// `WouldDeadlock` if the calling thread already owns the lock.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_inner(None, None)
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`. A
    /// timed-out call leaves the lock untouched.
    ///
    /// # Errors
    ///
    /// `TimedOut` or `WouldDeadlock`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<()> {
        self.acquire_inner(Instant::now().checked_add(timeout), None)
    }

    /// Like [`acquire`](Self::acquire) under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut` or `WouldDeadlock`.
    pub fn acquire_with(&self, cx: &Cx) -> Result<()> {
        self.acquire_inner(None, Some(cx))
    }

    /// Takes the lock if it is free and nobody is queued.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.owner.is_none() && state.waiters.is_empty() {
            state.owner = Some(thread::current().id());
            true
        } else {
            false
        }
    }

    /// Releases the lock, handing it to the longest waiter if there is one.
    ///
    /// # Errors
    ///
    /// `NotOwned` if the calling thread does not hold the lock.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let next = {
            let mut state = self.state.lock();
            if state.owner != Some(me) {
                tracing::warn!(owner = ?state.owner, caller = ?me, "mutex release by non-owner");
                return Err(Error::not_owned("mutex"));
            }
            let next = state.waiters.grant_front();
            state.owner = next.as_ref().map(|waiter| waiter.thread().id());
            next
        };
        if let Some(waiter) = next {
            tracing::trace!(waiter = waiter.id(), "mutex handed off");
            waiter.wake();
        }
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// `WouldDeadlock` if the calling thread already owns the lock.
    pub fn lock(&self) -> Result<RawMutexGuard<'_>> {
        self.acquire()?;
        Ok(RawMutexGuard::new(self))
    }

    /// Returns a guard if the lock could be taken without waiting.
    #[must_use]
    pub fn try_lock(&self) -> Option<RawMutexGuard<'_>> {
        self.try_acquire().then(|| RawMutexGuard::new(self))
    }

    /// Returns true if some thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Returns true if the calling thread holds the lock.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Returns the number of threads queued for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn acquire_inner(&self, deadline: Option<Instant>, cx: Option<&Cx>) -> Result<()> {
        let me = thread::current().id();
        let waiter = {
            let mut state = self.state.lock();
            if state.owner == Some(me) {
                return Err(Error::new(ErrorKind::WouldDeadlock)
                    .with_message("mutex is already held by the calling thread"));
            }
            if let Some(cx) = cx {
                cx.checkpoint()?;
            }
            if state.owner.is_none() && state.waiters.is_empty() {
                state.owner = Some(me);
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::timed_out());
            }
            state.waiters.push(1)
        };

        tracing::trace!(waiter = waiter.id(), "mutex acquire waiting");
        match wait_queue::park(&waiter, deadline, cx) {
            Wake::Granted => Ok(()),
            wake => self.abandon(&waiter, wake),
        }
    }

    fn abandon(&self, waiter: &Waiter, wake: Wake) -> Result<()> {
        let mut state = self.state.lock();
        if state.waiters.remove(waiter.id()) {
            drop(state);
            tracing::trace!(waiter = waiter.id(), ?wake, "mutex waiter abandoned");
            return Err(wake.into_error());
        }
        // Ownership was handed to us before we re-took the lock.
        debug_assert_eq!(state.owner, Some(waiter.thread().id()));
        Ok(())
    }
}

/// Scoped ownership of a [`RawMutex`]. Not `Send`: the lock is released on
/// the thread that took it.
#[derive(Debug)]
#[must_use = "guard will be immediately released if not held"]
pub struct RawMutexGuard<'a> {
    mutex: &'a RawMutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RawMutexGuard<'a> {
    fn new(mutex: &'a RawMutex) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }
}

impl Drop for RawMutexGuard<'_> {
    fn drop(&mut self) {
        let released = self.mutex.release();
        debug_assert!(released.is_ok(), "guard is always dropped by the owner");
    }
}

/// A mutex protecting a value of type `T`.
#[derive(Debug)]
pub struct Mutex<T> {
    raw: RawMutex,
    poisoned: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `raw`; the value moves between
// threads only as a whole, which requires `T: Send`.
unsafe impl<T: Send> Send for Mutex<T> {}
// SAFETY: as above, at most one guard (and so one `&mut T`) exists at a time.
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in the unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            poisoned: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Locks the mutex, blocking until it is available.
    ///
    /// # Errors
    ///
    /// `Poisoned` if a previous holder panicked; `WouldDeadlock` if the
    /// calling thread already holds the lock.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.raw.acquire()?;
        self.guard()
    }

    /// Locks the mutex, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut`, `Poisoned` or `WouldDeadlock`.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_, T>> {
        self.raw.acquire_timeout(timeout)?;
        self.guard()
    }

    /// Locks the mutex under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut`, `Poisoned` or `WouldDeadlock`.
    pub fn lock_with(&self, cx: &Cx) -> Result<MutexGuard<'_, T>> {
        self.raw.acquire_with(cx)?;
        self.guard()
    }

    /// Tries to lock without waiting.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if the lock is held or contended; `Poisoned` if a
    /// previous holder panicked.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>> {
        if !self.raw.try_acquire() {
            return Err(Error::would_block());
        }
        self.guard()
    }

    fn guard(&self) -> Result<MutexGuard<'_, T>> {
        if self.is_poisoned() {
            let released = self.raw.release();
            debug_assert!(released.is_ok());
            return Err(Error::new(ErrorKind::Poisoned));
        }
        Ok(MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// Returns true if a holder panicked while holding the lock.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Clears the poisoned flag.
    pub fn clear_poison(&self) {
        self.poisoned.store(false, Ordering::Release);
    }

    /// Returns true if the mutex is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns the number of threads waiting for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.raw.waiters()
    }

    /// Returns a mutable reference to the value. No locking is needed since
    /// `&mut self` proves exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the mutex, returning the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Scoped access to a [`Mutex`] value. Releases the lock on drop, poisoning
/// the mutex if the thread is panicking.
#[must_use = "guard will be immediately released if not held"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

// SAFETY: a shared guard only exposes `&T`.
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves we hold the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("value", &**self).finish()
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.mutex.poisoned.store(true, Ordering::Release);
            tracing::debug!("mutex poisoned by panicking holder");
        }
        let released = self.mutex.raw.release();
        debug_assert!(released.is_ok(), "guard is always dropped by the owner");
    }
}
