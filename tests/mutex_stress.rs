#![allow(missing_docs)]
//! Mutual exclusion under heavy contention.
//!
//! Run: `cargo test --test mutex_stress`

#[macro_use]
mod common;

use common::{init_test_logging, wait_until};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use turnstile::sync::{Mutex, RawMutex};
use turnstile::{Cx, ErrorKind};

const WORKERS: usize = 100;
const RUNS: usize = 1000;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn hundred_workers_increment_exactly_once_each() {
    init_test("hundred_workers_increment_exactly_once_each");
    for run in 0..RUNS {
        let counter = Mutex::new(0usize);
        thread::scope(|scope| {
            for _ in 0..WORKERS {
                scope.spawn(|| {
                    let mut guard = counter.lock().expect("lock");
                    let seen = *guard;
                    thread::yield_now();
                    *guard = seen + 1;
                });
            }
        });
        let total = counter.into_inner();
        assert_with_log!(total == WORKERS, "counter after run", (run, WORKERS), (run, total));
    }
    test_complete!("hundred_workers_increment_exactly_once_each");
}

#[test]
fn raw_mutex_never_admits_two_threads() {
    init_test("raw_mutex_never_admits_two_threads");
    let mutex = Arc::new(RawMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let inside = Arc::clone(&inside);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for _ in 0..500 {
                    mutex.acquire().expect("acquire");
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    inside.fetch_sub(1, Ordering::SeqCst);
                    mutex.release().expect("release by owner");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let violations = violations.load(Ordering::SeqCst);
    assert_with_log!(violations == 0, "overlapping holders", 0usize, violations);
    assert!(!mutex.is_locked());
    test_complete!("raw_mutex_never_admits_two_threads");
}

#[test]
fn abandoned_waiters_do_not_block_handoff() {
    init_test("abandoned_waiters_do_not_block_handoff");
    let mutex = Arc::new(RawMutex::new());
    mutex.acquire().expect("acquire");

    // The front waiter is cancelled and a later one times out; the waiter
    // between them must still get the lock.
    let cx = Cx::new();
    let cancelled = {
        let mutex = Arc::clone(&mutex);
        let cx = cx.clone();
        thread::spawn(move || mutex.acquire_with(&cx))
    };
    wait_until(|| mutex.waiters() == 1);
    let patient = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.acquire()?;
            mutex.release()
        })
    };
    wait_until(|| mutex.waiters() == 2);
    let timed = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || mutex.acquire_timeout(Duration::from_millis(30)))
    };
    let timed = timed.join().expect("timed waiter");
    assert!(matches!(&timed, Err(e) if e.kind() == ErrorKind::TimedOut));
    assert_eq!(mutex.waiters(), 2);

    cx.cancel();
    let cancelled = cancelled.join().expect("cancelled waiter");
    assert!(matches!(&cancelled, Err(e) if e.kind() == ErrorKind::Cancelled));

    mutex.release().expect("release");
    patient.join().expect("patient waiter").expect("acquire and release");
    assert_with_log!(!mutex.is_locked(), "unlocked at end", false, mutex.is_locked());
    test_complete!("abandoned_waiters_do_not_block_handoff");
}
