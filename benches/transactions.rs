use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use simpledb_core::{BlockId, DbConfig, SimpleDB};
use tempfile::TempDir;

fn open_bench_db() -> (SimpleDB, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = SimpleDB::new(dir.path(), DbConfig::default().with_num_buffers(16)).unwrap();
    (db, dir)
}

fn bench_commit(c: &mut Criterion) {
    let (db, _dir) = open_bench_db();
    let block_id = BlockId::new("benchfile", 0);

    let mut group = c.benchmark_group("transaction_commit");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("read_only", |b| {
        b.iter(|| {
            let tx = db.new_tx().unwrap();
            tx.pin(&block_id).unwrap();
            tx.get_int(&block_id, 0).unwrap();
            tx.commit().unwrap();
        })
    });

    //  every logged write forces the page and the log at commit
    group.bench_function("logged_write", |b| {
        let mut value = 0;
        b.iter(|| {
            value += 1;
            let tx = db.new_tx().unwrap();
            tx.pin(&block_id).unwrap();
            tx.set_int(&block_id, 0, value, true).unwrap();
            tx.set_string(&block_id, 8, "benchmark", true).unwrap();
            tx.commit().unwrap();
        })
    });
    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let (db, _dir) = open_bench_db();
    let block_id = BlockId::new("benchfile", 1);

    let mut group = c.benchmark_group("transaction_rollback");
    group.sample_size(20);
    group.bench_function("ten_updates", |b| {
        b.iter(|| {
            let tx = db.new_tx().unwrap();
            tx.pin(&block_id).unwrap();
            for i in 0..10 {
                tx.set_int(&block_id, i * 4, i as i32, true).unwrap();
            }
            tx.rollback().unwrap();
        })
    });
    group.finish();
}

fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");
    group.sample_size(10);
    group.bench_function("reopen_after_100_uncommitted_updates", |b| {
        b.iter_batched(
            || {
                let (db, dir) = open_bench_db();
                let block_id = BlockId::new("benchfile", 0);
                let tx = db.new_tx().unwrap();
                tx.pin(&block_id).unwrap();
                for i in 0..100 {
                    tx.set_int(&block_id, (i % 90) * 4, i as i32, true).unwrap();
                }
                //  the dirty page and its log records reach disk, the commit never does
                db.buffer_manager().flush_all(tx.tx_id()).unwrap();
                dir
            },
            |dir| {
                let db = SimpleDB::new(dir.path(), DbConfig::default()).unwrap();
                (db, dir)
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_commit, bench_rollback, bench_recovery);
criterion_main!(benches);
