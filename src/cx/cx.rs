//! The cancellation context type.
//!
//! `Cx` is the token a worker hands to a blocking operation so that the
//! wait can be abandoned from outside:
//! - Explicit cancellation via [`Cx::cancel`]
//! - A deadline, fixed at construction
//! - Propagation from a parent context to every child
//!
//! # Thread Safety
//!
//! `Cx` is cheaply clonable (it wraps an `Arc`). Clones share the same
//! underlying state, so a cancellation requested through one clone is
//! visible to all of them, and to every blocked worker waiting under any of
//! them.
//!
//! # Wakeups
//!
//! A worker that parks inside a primitive registers its thread with the
//! context (and every ancestor) for the duration of the wait. `cancel()`
//! unparks all registered threads, so cancellation is observed promptly
//! rather than at the next timeout.

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::Thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A cancellation context for blocking operations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use turnstile::Cx;
///
/// let cx = Cx::new();
/// assert!(cx.checkpoint().is_ok());
///
/// let child = cx.child_with_timeout(Duration::from_secs(5));
/// cx.cancel();
/// assert!(child.is_cancel_requested());
/// assert!(child.checkpoint().unwrap_err().is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

#[derive(Debug)]
struct CxInner {
    cancel_requested: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Cx>,
    parked: ParkingMutex<SmallVec<[(u64, Thread); 2]>>,
    next_park_id: AtomicU64,
}

impl Cx {
    fn from_parts(deadline: Option<Instant>, parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                cancel_requested: AtomicBool::new(false),
                deadline,
                parent,
                parked: ParkingMutex::new(SmallVec::new()),
                next_park_id: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a root context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(None, None)
    }

    /// Creates a root context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_parts(Instant::now().checked_add(timeout), None)
    }

    /// Creates a root context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::from_parts(Some(deadline), None)
    }

    /// Creates a child context. Cancelling `self` cancels the child; the
    /// child can be cancelled on its own without affecting `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::from_parts(None, Some(self.clone()))
    }

    /// Creates a child context with its own timeout. The effective deadline
    /// is the earlier of the child's and the parent's.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::from_parts(Instant::now().checked_add(timeout), Some(self.clone()))
    }

    /// Requests cancellation and wakes every worker blocked under this
    /// context or any of its children.
    pub fn cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::Release);
        let parked: SmallVec<[Thread; 2]> = self
            .inner
            .parked
            .lock()
            .iter()
            .map(|(_, thread)| thread.clone())
            .collect();
        tracing::trace!(woken = parked.len(), "cx cancelled");
        for thread in parked {
            thread.unpark();
        }
    }

    /// Returns true if cancellation has been requested on this context or
    /// any ancestor.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        let mut cx = Some(self);
        while let Some(current) = cx {
            if current.inner.cancel_requested.load(Ordering::Acquire) {
                return true;
            }
            cx = current.inner.parent.as_ref();
        }
        false
    }

    /// Returns the effective deadline: the earliest deadline on this context
    /// and its ancestors.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut cx = Some(self);
        while let Some(current) = cx {
            if let Some(deadline) = current.inner.deadline {
                earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
            }
            cx = current.inner.parent.as_ref();
        }
        earliest
    }

    /// Checks for cancellation and deadline expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) if
    /// cancellation is pending, or [`ErrorKind::TimedOut`](crate::ErrorKind::TimedOut)
    /// if the deadline has passed. Cancellation wins when both hold.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(Error::cancelled());
        }
        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            return Err(Error::timed_out());
        }
        Ok(())
    }

    /// Registers `thread` to be unparked on cancellation of this context or
    /// any ancestor. The registration ends when the returned guard drops.
    pub(crate) fn register_parked(&self, thread: &Thread) -> ParkRegistration<'_> {
        let mut entries: SmallVec<[(&Self, u64); 2]> = SmallVec::new();
        let mut cx = Some(self);
        while let Some(current) = cx {
            let id = current.inner.next_park_id.fetch_add(1, Ordering::Relaxed);
            current.inner.parked.lock().push((id, thread.clone()));
            entries.push((current, id));
            cx = current.inner.parent.as_ref();
        }
        ParkRegistration { entries }
    }
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that removes a parked-thread registration on drop.
#[must_use]
pub(crate) struct ParkRegistration<'a> {
    entries: SmallVec<[(&'a Cx, u64); 2]>,
}

impl Drop for ParkRegistration<'_> {
    fn drop(&mut self) {
        for (cx, id) in &self.entries {
            cx.inner.parked.lock().retain(|(entry, _)| entry != id);
        }
    }
}
