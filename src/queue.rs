//! Bounded blocking FIFO queue.
//!
//! The queue is the classic producer/consumer composition: a semaphore
//! counting empty slots, a semaphore counting filled slots, and a mutex
//! around the buffer held only for the push or pop itself.
//!
//! ```text
//! enqueue: empty_slots.down -> lock, push_back, unlock -> filled_slots.up
//! dequeue: filled_slots.down -> lock, pop_front, unlock -> empty_slots.up
//! ```
//!
//! At every quiescent point the two semaphores' available permits add up
//! to the capacity, and the filled count equals the buffer length.
//!
//! # Closing
//!
//! [`close`](BoundedBlockingQueue::close) fails every blocked and future
//! enqueue and dequeue with [`ErrorKind::Closed`](crate::ErrorKind::Closed).
//! Items still buffered can be taken out with
//! [`drain`](BoundedBlockingQueue::drain).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::QueueConfig;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::sync::{Mutex, Semaphore, SemaphorePermit};

/// A failed enqueue. The rejected item is handed back to the caller.
#[derive(Debug)]
pub struct EnqueueError<T> {
    /// The item that was not enqueued.
    pub item: T,
    /// Why the enqueue failed.
    pub error: Error,
}

impl<T> EnqueueError<T> {
    /// Returns the item, discarding the error.
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enqueue failed: {}", self.error)
    }
}

impl<T: fmt::Debug> std::error::Error for EnqueueError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<EnqueueError<T>> for Error {
    fn from(err: EnqueueError<T>) -> Self {
        err.error
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Fixed capacity.
    pub capacity: usize,
    /// Items currently buffered.
    pub size: usize,
    /// Items accepted since creation.
    pub enqueued: u64,
    /// Items handed out since creation (excluding `drain`).
    pub dequeued: u64,
    /// Whether the queue has been closed.
    pub closed: bool,
}

/// A fixed-capacity FIFO queue whose operations block while full or empty.
#[derive(Debug)]
pub struct BoundedBlockingQueue<T> {
    buffer: Mutex<VecDeque<T>>,
    empty_slots: Semaphore,
    filled_slots: Semaphore,
    capacity: usize,
    size: AtomicUsize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    closed: AtomicBool,
}

impl<T> BoundedBlockingQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_capacity("queue capacity", capacity));
        }
        Ok(Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            empty_slots: Semaphore::new(capacity)?,
            filled_slots: Semaphore::with_limit(0, capacity)?,
            capacity,
            size: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a queue from its configuration section.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if the configured capacity is zero.
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        Self::new(config.capacity)
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// `Closed` if the queue is or becomes closed; the item is returned.
    pub fn enqueue(&self, item: T) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_inner(item, None, None)
    }

    /// Appends `item`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut` or `Closed`; the item is returned.
    pub fn enqueue_timeout(
        &self,
        item: T,
        timeout: Duration,
    ) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_inner(item, Instant::now().checked_add(timeout), None)
    }

    /// Appends `item` under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut` or `Closed`; the item is returned.
    pub fn enqueue_with(&self, item: T, cx: &Cx) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_inner(item, None, Some(cx))
    }

    /// Appends `item` only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if full (or producers are queued); `Closed`.
    pub fn try_enqueue(&self, item: T) -> std::result::Result<(), EnqueueError<T>> {
        match self.empty_slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(error) => return Err(EnqueueError { item, error }),
        }
        self.push(item)
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// # Errors
    ///
    /// `Closed` if the queue is or becomes closed.
    pub fn dequeue(&self) -> Result<T> {
        self.dequeue_inner(None, None)
    }

    /// Removes the oldest item, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut` or `Closed`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T> {
        self.dequeue_inner(Instant::now().checked_add(timeout), None)
    }

    /// Removes the oldest item under a cancellation context.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `TimedOut` or `Closed`.
    pub fn dequeue_with(&self, cx: &Cx) -> Result<T> {
        self.dequeue_inner(None, Some(cx))
    }

    /// Removes the oldest item only if one is available right now.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if empty (or consumers are queued); `Closed`.
    pub fn try_dequeue(&self) -> Result<T> {
        self.filled_slots.try_acquire().map(SemaphorePermit::forget)?;
        self.pop()
    }

    /// Returns the number of buffered items. A snapshot.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns true if no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the queue, waking every blocked producer and consumer.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.empty_slots.close();
        self.filled_slots.close();
        tracing::debug!(buffered = self.size(), "queue closed");
    }

    /// Removes and returns every buffered item in FIFO order.
    ///
    /// On an open queue this takes only what can be dequeued without
    /// blocking.
    ///
    /// # Errors
    ///
    /// `Poisoned` if a thread panicked while holding the buffer lock.
    pub fn drain(&self) -> Result<Vec<T>> {
        if !self.is_closed() {
            let mut items = Vec::with_capacity(self.size());
            loop {
                match self.try_dequeue() {
                    Ok(item) => items.push(item),
                    Err(err) if err.is_closed() => break,
                    Err(err) if err.kind() == crate::ErrorKind::WouldBlock => {
                        return Ok(items);
                    }
                    Err(err) => return Err(err),
                }
            }
            // Closed while draining; fall through to take the rest.
            let mut buffer = self.buffer.lock()?;
            items.extend(buffer.drain(..));
            self.size.store(0, Ordering::Release);
            return Ok(items);
        }
        let mut buffer = self.buffer.lock()?;
        let items: Vec<T> = buffer.drain(..).collect();
        self.size.store(0, Ordering::Release);
        drop(buffer);
        tracing::debug!(items = items.len(), "drained closed queue");
        Ok(items)
    }

    /// Returns a snapshot of the queue's counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            size: self.size(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn enqueue_inner(
        &self,
        item: T,
        deadline: Option<Instant>,
        cx: Option<&Cx>,
    ) -> std::result::Result<(), EnqueueError<T>> {
        if let Err(error) = self.empty_slots.acquire_inner(1, deadline, cx) {
            return Err(EnqueueError { item, error });
        }
        self.push(item)
    }

    fn dequeue_inner(&self, deadline: Option<Instant>, cx: Option<&Cx>) -> Result<T> {
        self.filled_slots.acquire_inner(1, deadline, cx)?;
        self.pop()
    }

    /// Second half of an enqueue; the caller holds one empty-slot permit.
    fn push(&self, item: T) -> std::result::Result<(), EnqueueError<T>> {
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(error) => {
                self.return_permit(&self.empty_slots);
                return Err(EnqueueError { item, error });
            }
        };
        if self.is_closed() {
            drop(buffer);
            self.return_permit(&self.empty_slots);
            return Err(EnqueueError {
                item,
                error: Error::closed(),
            });
        }
        buffer.push_back(item);
        self.size.store(buffer.len(), Ordering::Release);
        drop(buffer);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.return_permit(&self.filled_slots);
        Ok(())
    }

    /// Second half of a dequeue; the caller holds one filled-slot permit.
    fn pop(&self) -> Result<T> {
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(error) => {
                self.return_permit(&self.filled_slots);
                return Err(error);
            }
        };
        let item = if self.is_closed() {
            None
        } else {
            buffer.pop_front()
        };
        let Some(item) = item else {
            drop(buffer);
            self.return_permit(&self.filled_slots);
            return Err(Error::closed());
        };
        self.size.store(buffer.len(), Ordering::Release);
        drop(buffer);
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.return_permit(&self.empty_slots);
        Ok(item)
    }

    fn return_permit(&self, slots: &Semaphore) {
        let returned = slots.up();
        debug_assert!(returned.is_ok(), "slot permits are balanced");
    }
}
