//! Blocking synchronization primitives for native threads.
//!
//! # Primitives
//!
//! - [`RawMutex`] / [`Mutex`]: mutual exclusion with ownership checks
//! - [`Semaphore`]: counting semaphore with FIFO permit hand-off
//!
//! Every blocking call comes in three forms: plain (wait indefinitely),
//! `*_timeout` (bounded) and `*_with(&Cx)` (cancellable). A wait that ends
//! early leaves the primitive exactly as it found it.
//!
//! # Cancel Safety
//!
//! - Cancellation during wait: clean abort, nothing held
//! - Cancellation while holding: guard dropped, resource released
//! - Panic while holding: guard dropped via unwind

mod mutex;
mod semaphore;
pub(crate) mod wait_queue;

pub use mutex::{Mutex, MutexGuard, RawMutex, RawMutexGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
