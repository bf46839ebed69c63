#![allow(missing_docs)]
//! Semaphore capacity bound and permit conservation.
//!
//! Run: `cargo test --test semaphore_bound`

#[macro_use]
mod common;

use common::init_test_logging;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use turnstile::sync::Semaphore;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Runs `workers` threads through `rounds` acquire/release cycles and
/// returns the largest number of simultaneous holders observed.
fn peak_holders(capacity: usize, workers: usize, rounds: usize, timeout: bool) -> usize {
    let sem = Arc::new(Semaphore::new(capacity).expect("semaphore"));
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let sem = Arc::clone(&sem);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..rounds {
                    let permit = if timeout {
                        match sem.acquire_timeout(Duration::from_micros(200)) {
                            Ok(permit) => permit,
                            Err(err) => {
                                assert!(err.is_timeout());
                                continue;
                            }
                        }
                    } else {
                        sem.acquire().expect("acquire")
                    };
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
    assert_eq!(sem.available_permits(), capacity, "permits conserved");
    assert_eq!(sem.outstanding(), 0);
    assert_eq!(sem.waiters(), 0);
    peak.load(Ordering::SeqCst)
}

#[test]
fn raw_down_up_conserves_permits() {
    init_test("raw_down_up_conserves_permits");
    let sem = Arc::new(Semaphore::new(3).expect("semaphore"));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                for _ in 0..200 {
                    sem.down().expect("down");
                    sem.up().expect("up");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
    assert_with_log!(
        sem.available_permits() == 3,
        "permits after churn",
        3usize,
        sem.available_permits()
    );
    test_complete!("raw_down_up_conserves_permits");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// No more than N holders at once, for any N and any mix of plain and
    /// timed acquires; every permit is back at the end.
    #[test]
    fn holders_never_exceed_capacity(
        capacity in 1usize..6,
        workers in 1usize..10,
        timeout in any::<bool>(),
    ) {
        init_test_logging();
        let peak = peak_holders(capacity, workers, 40, timeout);
        prop_assert!(peak <= capacity, "peak {} above capacity {}", peak, capacity);
    }
}
