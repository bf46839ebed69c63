//! Contention benchmarks for the coordination primitives.
//!
//! - Uncontended lock/unlock and permit round trips
//! - Mutex and semaphore under 2..8 competing threads
//! - Queue throughput for one and several producer/consumer pairs
//! - Resource-set episodes around a dining table, per policy
//!
//! Run: `cargo bench --bench contention`

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use turnstile::coordinator::{PolicyKind, ResourceSetCoordinator};
use turnstile::queue::BoundedBlockingQueue;
use turnstile::sync::{Mutex, Semaphore};

const OPS_PER_THREAD: u64 = 1_000;

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    let mutex = Mutex::new(0u64);
    group.bench_function("mutex_lock_unlock", |b| {
        b.iter(|| {
            let mut guard = mutex.lock().expect("lock");
            *guard += 1;
        })
    });

    let sem = Semaphore::new(1).expect("semaphore");
    group.bench_function("semaphore_acquire_release", |b| {
        b.iter(|| black_box(sem.acquire().expect("acquire")))
    });

    let queue = BoundedBlockingQueue::new(1).expect("queue");
    group.bench_function("queue_enqueue_dequeue", |b| {
        b.iter(|| {
            queue.enqueue(black_box(1u64)).expect("enqueue");
            black_box(queue.dequeue().expect("dequeue"))
        })
    });

    group.finish();
}

fn bench_mutex_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutex_contention");
    for threads in [2u64, 4, 8] {
        group.throughput(Throughput::Elements(threads * OPS_PER_THREAD));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let counter = Mutex::new(0u64);
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..OPS_PER_THREAD {
                                *counter.lock().expect("lock") += 1;
                            }
                        });
                    }
                });
                black_box(counter.into_inner())
            })
        });
    }
    group.finish();
}

fn bench_semaphore_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("semaphore_contention");
    for threads in [2u64, 4, 8] {
        group.throughput(Throughput::Elements(threads * OPS_PER_THREAD));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let sem = Semaphore::new(2).expect("semaphore");
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..OPS_PER_THREAD {
                                black_box(sem.acquire().expect("acquire"));
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

fn bench_queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_throughput");
    for pairs in [1u64, 2, 4] {
        group.throughput(Throughput::Elements(pairs * OPS_PER_THREAD));
        group.bench_with_input(BenchmarkId::new("pairs", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                let queue = BoundedBlockingQueue::new(16).expect("queue");
                thread::scope(|scope| {
                    for _ in 0..pairs {
                        scope.spawn(|| {
                            for i in 0..OPS_PER_THREAD {
                                queue.enqueue(i).expect("enqueue");
                            }
                        });
                        scope.spawn(|| {
                            for _ in 0..OPS_PER_THREAD {
                                black_box(queue.dequeue().expect("dequeue"));
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

fn bench_dining_table(c: &mut Criterion) {
    const SEATS: usize = 5;
    const MEALS: u64 = 100;
    let mut group = c.benchmark_group("dining_table");
    group.throughput(Throughput::Elements(SEATS as u64 * MEALS));
    for policy in [PolicyKind::GlobalOrder, PolicyKind::Backoff] {
        group.bench_function(BenchmarkId::from_parameter(policy), |b| {
            b.iter(|| {
                let table = Arc::new(ResourceSetCoordinator::new(SEATS, policy).expect("table"));
                let seats: Vec<_> = (0..SEATS)
                    .map(|seat| {
                        table
                            .register([seat, (seat + 1) % SEATS])
                            .expect("register")
                    })
                    .collect();
                thread::scope(|scope| {
                    for &agent in &seats {
                        let table = &table;
                        scope.spawn(move || {
                            for _ in 0..MEALS {
                                let _meal = table.hold(agent).expect("hold");
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_mutex_contention,
    bench_semaphore_contention,
    bench_queue_throughput,
    bench_dining_table
);
criterion_main!(benches);
