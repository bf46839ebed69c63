#![allow(missing_docs)]
//! Dining philosophers on real threads.
//!
//! Run: `cargo test --test coordinator_stress`

#[macro_use]
mod common;

use common::{init_test_logging, wait_until};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use turnstile::config::{BackoffConfig, CoordinatorConfig};
use turnstile::coordinator::{AgentPhase, FairnessEvent, PolicyKind, ResourceSetCoordinator};
use turnstile::Cx;

const PHILOSOPHERS: usize = 5;
const MEALS: usize = 200;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Runs a table of five philosophers and checks forks are never shared.
fn dine(coord: &Arc<ResourceSetCoordinator>) {
    let forks: Arc<Vec<AtomicUsize>> =
        Arc::new((0..PHILOSOPHERS).map(|_| AtomicUsize::new(0)).collect());
    let violations = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..PHILOSOPHERS)
        .map(|seat| {
            let left = seat;
            let right = (seat + 1) % PHILOSOPHERS;
            let agent = coord.register([left, right]).expect("register");
            let coord = Arc::clone(coord);
            let forks = Arc::clone(&forks);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for _ in 0..MEALS {
                    let meal = coord.hold(agent).expect("hold");
                    for fork in [left, right] {
                        if forks[fork].fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    thread::yield_now();
                    for fork in [left, right] {
                        forks[fork].fetch_sub(1, Ordering::SeqCst);
                    }
                    drop(meal);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("philosopher");
    }
    let violations = violations.load(Ordering::SeqCst);
    assert_with_log!(violations == 0, "shared forks", 0usize, violations);
}

#[test]
fn global_order_table_finishes_every_meal() {
    init_test("global_order_table_finishes_every_meal");
    let coord = Arc::new(
        ResourceSetCoordinator::new(PHILOSOPHERS, PolicyKind::GlobalOrder).expect("coordinator"),
    );
    dine(&coord);
    let stats = coord.stats();
    let expected = (PHILOSOPHERS * MEALS) as u64;
    assert_with_log!(
        stats.completed_episodes == expected,
        "meals",
        expected,
        stats.completed_episodes
    );
    let ceiling = coord.fairness_bound() + PHILOSOPHERS as u32 - 2;
    assert_with_log!(
        stats.max_overtaken <= ceiling,
        "overtakes bounded",
        ceiling,
        stats.max_overtaken
    );
    tracing::info!(stats = ?stats, "global order table done");
    test_complete!("global_order_table_finishes_every_meal");
}

#[test]
fn backoff_table_finishes_every_meal() {
    init_test("backoff_table_finishes_every_meal");
    let config = CoordinatorConfig {
        resources: PHILOSOPHERS,
        policy: PolicyKind::Backoff,
        backoff: BackoffConfig {
            initial: Duration::from_micros(20),
            max: Duration::from_millis(1),
            multiplier: 2.0,
        },
        ..CoordinatorConfig::default()
    };
    let coord = Arc::new(ResourceSetCoordinator::with_config(&config).expect("coordinator"));
    dine(&coord);
    let stats = coord.stats();
    assert_with_log!(
        stats.completed_episodes == (PHILOSOPHERS * MEALS) as u64,
        "meals",
        PHILOSOPHERS * MEALS,
        stats.completed_episodes
    );
    assert_eq!(stats.holding, 0);
    assert_eq!(stats.acquiring, 0);
    test_complete!("backoff_table_finishes_every_meal");
}

#[test]
fn tight_fairness_bound_reports_but_does_not_fail() {
    init_test("tight_fairness_bound_reports_but_does_not_fail");
    let coord = Arc::new(
        ResourceSetCoordinator::new(PHILOSOPHERS, PolicyKind::GlobalOrder)
            .expect("coordinator")
            .with_fairness_bound(1)
            .expect("bound"),
    );
    let events = Arc::new(Mutex::new(Vec::<FairnessEvent>::new()));
    {
        let events = Arc::clone(&events);
        coord.on_fairness_event(move |event| events.lock().push(event.clone()));
    }
    dine(&coord);
    let stats = coord.stats();
    assert_eq!(stats.completed_episodes, (PHILOSOPHERS * MEALS) as u64);
    let ceiling = 1 + PHILOSOPHERS as u32 - 2;
    assert_with_log!(
        stats.max_overtaken <= ceiling,
        "overtakes bounded by gate",
        ceiling,
        stats.max_overtaken
    );
    assert_eq!(stats.fairness_events, events.lock().len() as u64);
    test_complete!("tight_fairness_bound_reports_but_does_not_fail");
}

#[test]
fn cancelled_table_shuts_down_cleanly() {
    init_test("cancelled_table_shuts_down_cleanly");
    let coord = Arc::new(
        ResourceSetCoordinator::new(PHILOSOPHERS, PolicyKind::GlobalOrder).expect("coordinator"),
    );
    let cx = Cx::new();
    let meals = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..PHILOSOPHERS)
        .map(|seat| {
            let agent = coord
                .register([seat, (seat + 1) % PHILOSOPHERS])
                .expect("register");
            let coord = Arc::clone(&coord);
            let cx = cx.child();
            let meals = Arc::clone(&meals);
            thread::spawn(move || loop {
                match coord.acquire_all_with(agent, &cx) {
                    Ok(()) => {
                        meals.fetch_add(1, Ordering::Relaxed);
                        coord.release_all(agent).expect("release");
                    }
                    Err(err) => return (agent, err),
                }
            })
        })
        .collect();

    wait_until(|| meals.load(Ordering::Relaxed) >= 50);
    cx.cancel();
    for handle in handles {
        let (agent, err) = handle.join().expect("philosopher");
        assert_with_log!(err.is_cancelled(), "stopped by cancel", true, err.is_cancelled());
        assert_eq!(coord.phase(agent).expect("phase"), AgentPhase::Idle);
    }
    for fork in 0..PHILOSOPHERS {
        assert_eq!(coord.holder(fork).expect("holder"), None);
    }
    test_complete!("cancelled_table_shuts_down_cleanly");
}
