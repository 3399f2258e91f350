use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use simpledb_core::{BlockId, LockTable, NoStarvationGuard};

const CONCURRENCY_LEVELS: &[usize] = &[1, 2, 4, 8];
const LOCKS_PER_WORKER: usize = 1024;

fn bench_uncontended_lock_cycle(c: &mut Criterion) {
    let lock_table = LockTable::new(Duration::from_secs(10));
    let block_id = BlockId::new("benchfile", 0);

    let mut group = c.benchmark_group("lock_table_uncontended");
    group.bench_function("shared_then_unlock", |b| {
        b.iter(|| {
            lock_table.shared_lock(&block_id, 1).unwrap();
            lock_table.unlock(&block_id, 1);
        })
    });
    group.bench_function("upgrade_then_unlock", |b| {
        b.iter(|| {
            lock_table.shared_lock(&block_id, 1).unwrap();
            lock_table.exclusive_lock(&block_id, 1).unwrap();
            lock_table.unlock(&block_id, 1);
        })
    });
    group.finish();
}

/// All workers share-lock the same blocks, so only the table mutex is contended
fn bench_shared_lock_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_table_shared_scaling");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(
            (concurrency * LOCKS_PER_WORKER) as u64,
        ));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                let lock_table = Arc::new(LockTable::with_policy(
                    Duration::from_secs(10),
                    Box::new(NoStarvationGuard),
                ));
                b.iter(|| {
                    let barrier = Barrier::new(concurrency);
                    thread::scope(|scope| {
                        for worker in 0..concurrency {
                            let lock_table = Arc::clone(&lock_table);
                            let barrier = &barrier;
                            scope.spawn(move || {
                                let tx_id = worker as i32 + 1;
                                let blocks: Vec<BlockId> = (0..LOCKS_PER_WORKER)
                                    .map(|i| BlockId::new("benchfile", i))
                                    .collect();
                                barrier.wait();
                                for block_id in &blocks {
                                    lock_table.shared_lock(block_id, tx_id).unwrap();
                                }
                                for block_id in &blocks {
                                    lock_table.unlock(block_id, tx_id);
                                }
                            });
                        }
                    });
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended_lock_cycle,
    bench_shared_lock_scaling
);
criterion_main!(benches);
