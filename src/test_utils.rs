use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use tempfile::TempDir;

use crate::{DbConfig, SimpleDB, TransactionConfig};

/// A file name that no other test in this process will use
pub fn generate_filename() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("testfile_{:?}_{}", std::thread::current().id(), id)
        .replace(['(', ')'], "")
}

/// Short timeouts so tests that exercise waiting finish quickly
pub fn test_config(block_size: usize, num_buffers: usize) -> DbConfig {
    DbConfig {
        lock_timeout: Duration::from_millis(500),
        buffer_timeout: Duration::from_millis(100),
        transaction: TransactionConfig {
            max_retries: 20,
            retry_backoff_base_ms: 1,
            max_retry_backoff_ms: 20,
        },
        ..DbConfig::default()
    }
    .with_block_size(block_size)
    .with_num_buffers(num_buffers)
}

/// A fresh database in its own temporary directory. Keep the directory alive for as long
/// as the database is used.
pub fn test_db(block_size: usize, num_buffers: usize) -> (SimpleDB, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = SimpleDB::new(dir.path(), test_config(block_size, num_buffers)).unwrap();
    (db, dir)
}
