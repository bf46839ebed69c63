//! FIFO wait queue with direct hand-off, shared by the blocking primitives.
//!
//! A primitive keeps a [`WaitQueue`] inside its own state lock. A thread
//! that cannot proceed pushes a [`Waiter`], drops the state lock and parks
//! in [`park`]. The releasing side grants the resource to the waiter at the
//! front *while holding the state lock* (so no later arrival can barge in),
//! then unparks it after the lock is dropped.
//!
//! A waiter that gives up (timeout, cancellation) re-takes the state lock
//! and removes itself. If it is no longer queued, the grant raced ahead of
//! it and the wait counts as successful, so no permit is ever lost.

use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, Thread};
use std::time::Instant;

use crate::cx::Cx;
use crate::error::{Error, ErrorKind};

const WAITING: u8 = 0;
const GRANTED: u8 = 1;
const CLOSED: u8 = 2;
const REJECTED: u8 = 3;

/// A parked thread's slot in a wait queue.
#[derive(Debug)]
pub(crate) struct Waiter {
    id: u64,
    want: usize,
    thread: Thread,
    status: AtomicU8,
}

impl Waiter {
    fn for_current(id: u64, want: usize) -> Self {
        Self {
            id,
            want,
            thread: thread::current(),
            status: AtomicU8::new(WAITING),
        }
    }

    /// A waiter that belongs to no queue; only time or cancellation end its
    /// wait. Used for backoff sleeps.
    pub(crate) fn detached() -> Self {
        Self::for_current(u64::MAX, 0)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Outcome already decided by the other side, if any.
    pub(crate) fn settled(&self) -> Option<Wake> {
        match self.status.load(Ordering::Acquire) {
            GRANTED => Some(Wake::Granted),
            CLOSED => Some(Wake::Closed),
            REJECTED => Some(Wake::Rejected),
            _ => None,
        }
    }

    fn mark(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }

    /// Unparks the waiting thread. Call after dropping the state lock.
    pub(crate) fn wake(&self) {
        self.thread.unpark();
    }
}

/// Waiters collected under a lock, to be woken after it is released.
pub(crate) type Woken = SmallVec<[Arc<Waiter>; 4]>;

pub(crate) fn wake_all(woken: Woken) {
    for waiter in woken {
        waiter.wake();
    }
}

/// Ordered queue of blocked threads.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    waiters: VecDeque<Arc<Waiter>>,
    next_waiter_id: u64,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::with_capacity(4),
            next_waiter_id: 0,
        }
    }

    /// Enqueues the calling thread, wanting `want` units.
    pub(crate) fn push(&mut self, want: usize) -> Arc<Waiter> {
        let id = self.next_waiter_id;
        self.next_waiter_id = self.next_waiter_id.wrapping_add(1);
        let waiter = Arc::new(Waiter::for_current(id, want));
        self.waiters.push_back(Arc::clone(&waiter));
        waiter
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Units wanted by the longest-waiting thread.
    pub(crate) fn front_want(&self) -> Option<usize> {
        self.waiters.front().map(|w| w.want)
    }

    /// Pops the front waiter and marks it granted.
    pub(crate) fn grant_front(&mut self) -> Option<Arc<Waiter>> {
        let waiter = self.waiters.pop_front()?;
        waiter.mark(GRANTED);
        Some(waiter)
    }

    /// Grants every queued waiter (broadcast).
    pub(crate) fn grant_all(&mut self) -> Woken {
        self.waiters
            .drain(..)
            .map(|waiter| {
                waiter.mark(GRANTED);
                waiter
            })
            .collect()
    }

    /// Marks every queued waiter closed and empties the queue.
    pub(crate) fn close_all(&mut self) -> Woken {
        self.waiters
            .drain(..)
            .map(|waiter| {
                waiter.mark(CLOSED);
                waiter
            })
            .collect()
    }

    /// Rejects every waiter wanting more than `limit` units, which can
    /// never be satisfied once the capacity drops below its request.
    pub(crate) fn reject_oversized(&mut self, limit: usize) -> Woken {
        let mut rejected = Woken::new();
        self.waiters.retain(|waiter| {
            if waiter.want > limit {
                waiter.mark(REJECTED);
                rejected.push(Arc::clone(waiter));
                false
            } else {
                true
            }
        });
        rejected
    }

    /// Removes a waiter that abandoned its wait. Returns false if it was no
    /// longer queued (it was granted or closed first).
    pub(crate) fn remove(&mut self, waiter_id: u64) -> bool {
        if self.waiters.front().is_some_and(|w| w.id == waiter_id) {
            self.waiters.pop_front();
            return true;
        }
        if let Some(pos) = self.waiters.iter().position(|w| w.id == waiter_id) {
            self.waiters.remove(pos);
            true
        } else {
            false
        }
    }
}

/// How a parked wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Granted,
    Closed,
    /// The request can no longer fit the primitive's capacity.
    Rejected,
    TimedOut,
    Cancelled,
}

impl Wake {
    /// Error for an unsuccessful wake.
    pub(crate) fn into_error(self) -> Error {
        match self {
            Self::Closed | Self::Granted => Error::closed(),
            Self::TimedOut => Error::timed_out(),
            Self::Cancelled => Error::cancelled(),
            Self::Rejected => Error::new(ErrorKind::InvalidCapacity)
                .with_message("request exceeds the reduced capacity"),
        }
    }
}

/// Earliest of an explicit deadline and the context's deadline.
pub(crate) fn effective_deadline(deadline: Option<Instant>, cx: Option<&Cx>) -> Option<Instant> {
    match (deadline, cx.and_then(Cx::deadline)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Parks the calling thread until the waiter is settled, the deadline
/// passes, or `cx` is cancelled. Spurious unparks are absorbed here.
pub(crate) fn park(waiter: &Waiter, deadline: Option<Instant>, cx: Option<&Cx>) -> Wake {
    let _registration = cx.map(|cx| cx.register_parked(waiter.thread()));
    let deadline = effective_deadline(deadline, cx);
    loop {
        if let Some(wake) = waiter.settled() {
            return wake;
        }
        if cx.is_some_and(Cx::is_cancel_requested) {
            return Wake::Cancelled;
        }
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Wake::TimedOut;
                }
                thread::park_timeout(deadline - now);
            }
            None => thread::park(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn queue_is_fifo_and_grants_front() {
        let mut queue = WaitQueue::new();
        let a = queue.push(1);
        let b = queue.push(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front_want(), Some(1));

        let granted = queue.grant_front().expect("front waiter");
        assert_eq!(granted.id(), a.id());
        assert_eq!(a.settled(), Some(Wake::Granted));
        assert_eq!(b.settled(), None);
        assert_eq!(queue.front_want(), Some(2));
    }

    #[test]
    fn remove_reports_whether_still_queued() {
        let mut queue = WaitQueue::new();
        let a = queue.push(1);
        let b = queue.push(1);
        assert!(queue.remove(b.id()));
        assert!(!queue.remove(b.id()));
        let _ = queue.grant_front();
        assert!(!queue.remove(a.id()));
        assert!(queue.is_empty());
    }

    #[test]
    fn close_all_marks_closed() {
        let mut queue = WaitQueue::new();
        let a = queue.push(1);
        let woken = queue.close_all();
        assert_eq!(woken.len(), 1);
        assert_eq!(a.settled(), Some(Wake::Closed));
    }

    #[test]
    fn reject_oversized_keeps_fitting_waiters_in_order() {
        let mut queue = WaitQueue::new();
        let small = queue.push(1);
        let big = queue.push(3);
        let medium = queue.push(2);
        let rejected = queue.reject_oversized(2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(big.settled(), Some(Wake::Rejected));
        assert_eq!(small.settled(), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front_want(), Some(1));
        let _ = queue.grant_front();
        assert_eq!(queue.grant_front().map(|w| w.id()), Some(medium.id()));
    }

    #[test]
    fn park_times_out_without_grant() {
        let waiter = Waiter::detached();
        let start = Instant::now();
        let wake = park(&waiter, Some(start + Duration::from_millis(20)), None);
        assert_eq!(wake, Wake::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn park_observes_cancellation() {
        let cx = Cx::new();
        cx.cancel();
        let waiter = Waiter::detached();
        assert_eq!(park(&waiter, None, Some(&cx)), Wake::Cancelled);
    }

    #[test]
    fn effective_deadline_picks_earliest() {
        let now = Instant::now();
        let cx = Cx::with_deadline(now + Duration::from_secs(1));
        let explicit = now + Duration::from_secs(5);
        assert_eq!(
            effective_deadline(Some(explicit), Some(&cx)),
            Some(now + Duration::from_secs(1))
        );
        assert_eq!(effective_deadline(None, None), None);
    }
}
