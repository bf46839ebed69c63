//! Fair, cancel-aware coordination primitives for native threads.
//!
//! Turnstile provides the blocking building blocks for workers that share
//! one address space:
//!
//! - [`sync::RawMutex`] / [`sync::Mutex`]: mutual exclusion with ownership
//!   checks and FIFO hand-off
//! - [`sync::Semaphore`]: counting semaphore, strict FIFO, no queue jumping
//! - [`queue::BoundedBlockingQueue`]: fixed-capacity FIFO built from two
//!   semaphores and a mutex
//! - [`coordinator::ResourceSetCoordinator`]: agents that each need a fixed
//!   subset of exclusive resources (generalized dining philosophers), with
//!   a deadlock-free acquisition policy and a bounded-overtake fairness gate
//! - [`rate_limit::RateLimiter`]: at most `capacity` admissions per sliding
//!   window
//!
//! Every blocking call has a bounded `*_timeout` form and a cancellable
//! `*_with(&Cx)` form. Waits that end early leave no trace on the
//! primitive.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use turnstile::queue::BoundedBlockingQueue;
//!
//! let queue = Arc::new(BoundedBlockingQueue::new(2)?);
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..5 {
//!             queue.enqueue(i).map_err(|e| e.error)?;
//!         }
//!         Ok::<(), turnstile::Error>(())
//!     })
//! };
//! let received: Vec<i32> = (0..5).map(|_| queue.dequeue()).collect::<Result<_, _>>()?;
//! producer.join().expect("producer")?;
//! assert_eq!(received, vec![0, 1, 2, 3, 4]);
//! # Ok::<(), turnstile::Error>(())
//! ```

pub mod config;
pub mod coordinator;
pub mod cx;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod sync;
pub mod time;

#[cfg(test)]
#[macro_use]
mod test_utils;

pub use config::{ConfigError, ConfigLoader, TurnstileConfig};
pub use coordinator::{AgentId, PolicyKind, ResourceId, ResourceSetCoordinator};
pub use cx::Cx;
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use queue::BoundedBlockingQueue;
pub use rate_limit::RateLimiter;
pub use sync::{Mutex, RawMutex, Semaphore};
