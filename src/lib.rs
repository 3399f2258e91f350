//! The storage and transaction kernel of a small educational relational database.
//!
//! Data lives in fixed-size blocks of plain files, cached by a [`BufferManager`].
//! A [`Transaction`] reads and writes those blocks under strict two-phase locking
//! ([`LockTable`], [`ConcurrencyManager`]) and records the previous value of every
//! change in a write-ahead log ([`LogManager`], [`LogRecord`]) so that the
//! [`RecoveryManager`] can undo uncommitted work after a rollback or a crash.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub mod buffer_manager;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod log_manager;
pub mod page;
#[cfg(test)]
mod test_utils;
pub mod tx;

pub use buffer_manager::{Buffer, BufferManager};
pub use config::{DbConfig, TransactionConfig};
pub use error::{AbortReason, DbError, Result, TxState};
pub use file_manager::{BlockId, FileManager};
pub use log_manager::{LogIterator, LogManager, Lsn};
pub use page::{Page, PageError};
pub use tx::{
    concurrency_manager::ConcurrencyManager,
    lock_table::{
        LastHolderPolicy, LockState, LockTable, LockType, NoStarvationGuard, StarvationPolicy,
    },
    log_record::LogRecord,
    recovery_manager::RecoveryManager,
    Transaction, TransactionOperations,
};

pub type TransactionID = i32;

/// An open database directory together with the managers shared by all its transactions
pub struct SimpleDB {
    db_directory: PathBuf,
    config: DbConfig,
    file_manager: Arc<Mutex<FileManager>>,
    log_manager: Arc<Mutex<LogManager>>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    next_tx_id: AtomicI32,
    active: Arc<Mutex<BTreeSet<TransactionID>>>,
}

impl SimpleDB {
    /// Open the database in `path`, creating it if needed.
    /// An existing database is recovered before this returns.
    pub fn new<P: AsRef<Path>>(path: P, config: DbConfig) -> Result<Self> {
        let lock_table = Arc::new(LockTable::new(config.lock_timeout));
        Self::with_lock_table(path, config, lock_table)
    }

    /// Open the database with a caller supplied lock table, e.g. one using a different
    /// [`StarvationPolicy`]
    pub fn with_lock_table<P: AsRef<Path>>(
        path: P,
        config: DbConfig,
        lock_table: Arc<LockTable>,
    ) -> Result<Self> {
        let file_manager = FileManager::new(path.as_ref(), config.block_size)?;
        let is_new = file_manager.is_new();
        let file_manager = Arc::new(Mutex::new(file_manager));
        let log_manager = Arc::new(Mutex::new(LogManager::new(
            Arc::clone(&file_manager),
            &config.log_file,
        )?));
        let buffer_manager = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.num_buffers,
            config.buffer_timeout,
        ));
        let db = Self {
            db_directory: path.as_ref().to_path_buf(),
            config,
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            next_tx_id: AtomicI32::new(1),
            active: Arc::new(Mutex::new(BTreeSet::new())),
        };

        if is_new {
            info!(path = %db.db_directory.display(), "creating new database");
        } else {
            info!(path = %db.db_directory.display(), "recovering existing database");
            let tx = db.new_tx()?;
            tx.recover()?;
            tx.commit()?;
        }
        Ok(db)
    }

    /// Start a new transaction
    pub fn new_tx(&self) -> Result<Transaction> {
        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(tx_id, self)
    }

    /// Run `f` inside a transaction and commit it.
    /// A transaction aborted by the lock table is rolled back and `f` is retried in a
    /// fresh transaction with exponential backoff. Any other error rolls back and is returned.
    pub fn run_transaction<F, R>(&self, mut f: F) -> Result<R>
    where
        F: FnMut(&Transaction) -> Result<R>,
    {
        let retry = &self.config.transaction;
        let mut attempt = 0;
        loop {
            let tx = self.new_tx()?;
            let result = f(&tx).and_then(|value| tx.commit().map(|()| value));
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if tx.state() == TxState::Active {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(tx = tx.tx_id(), error = %rollback_err, "rollback failed");
                    return Err(err);
                }
            }
            if !err.is_lock_abort() || attempt >= retry.max_retries {
                return Err(err);
            }
            let backoff = retry.backoff(attempt);
            debug!(tx = tx.tx_id(), attempt, ?backoff, "retrying after lock abort");
            std::thread::sleep(backoff);
            attempt += 1;
        }
    }

    /// Write a non-quiescent checkpoint listing the transactions that are running right now
    pub fn checkpoint(&self) -> Result<Lsn> {
        //  transactions cannot register or deregister while the checkpoint is written
        let active = self.active.lock();
        RecoveryManager::checkpoint(&self.log_manager, active.iter().copied().collect())
    }

    /// The ids of the transactions that have neither committed nor rolled back
    pub fn active_transactions(&self) -> Vec<TransactionID> {
        self.active.lock().iter().copied().collect()
    }

    pub(crate) fn active_registry(&self) -> Arc<Mutex<BTreeSet<TransactionID>>> {
        Arc::clone(&self.active)
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn file_manager(&self) -> Arc<Mutex<FileManager>> {
        Arc::clone(&self.file_manager)
    }

    pub fn log_manager(&self) -> Arc<Mutex<LogManager>> {
        Arc::clone(&self.log_manager)
    }

    pub fn buffer_manager(&self) -> Arc<BufferManager> {
        Arc::clone(&self.buffer_manager)
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        Arc::clone(&self.lock_table)
    }
}
