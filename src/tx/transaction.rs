use std::{cell::Cell, collections::BTreeSet, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    buffer_manager::BufferManager,
    error::{DbError, Result, TxState},
    file_manager::BlockId,
    tx::{
        buffer_list::BufferList, concurrency_manager::ConcurrencyManager,
        recovery_manager::RecoveryManager, TransactionOperations,
    },
    FileManager, SimpleDB, TransactionID,
};

/// A unit of work over the database. Reads take shared locks and writes take exclusive
/// locks, all held until the transaction commits or rolls back.
///
/// A failed operation, a lock abort included, leaves the transaction active with its
/// earlier writes in place. The caller must [`Transaction::rollback`] it, or run the work
/// through [`SimpleDB::run_transaction`] which does so.
pub struct Transaction {
    file_manager: Arc<Mutex<FileManager>>,
    buffer_manager: Arc<BufferManager>,
    recovery_manager: RecoveryManager,
    concurrency_manager: ConcurrencyManager,
    buffer_list: BufferList,
    active: Arc<Mutex<BTreeSet<TransactionID>>>,
    tx_id: TransactionID,
    state: Cell<TxState>,
}

impl Transaction {
    /// Start a transaction and register it as active with the database
    pub(crate) fn new(tx_id: TransactionID, db: &SimpleDB) -> Result<Self> {
        let buffer_manager = db.buffer_manager();
        let recovery_manager =
            RecoveryManager::new(tx_id, db.log_manager(), Arc::clone(&buffer_manager))?;
        let active = db.active_registry();
        active.lock().insert(tx_id);
        debug!(tx = tx_id, "transaction started");
        Ok(Self {
            file_manager: db.file_manager(),
            buffer_list: BufferList::new(Arc::clone(&buffer_manager)),
            buffer_manager,
            recovery_manager,
            concurrency_manager: ConcurrencyManager::new(tx_id, db.lock_table()),
            active,
            tx_id,
            state: Cell::new(TxState::Active),
        })
    }

    pub fn tx_id(&self) -> TransactionID {
        self.tx_id
    }

    pub fn state(&self) -> TxState {
        self.state.get()
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state.get() {
            TxState::Active => Ok(()),
            state => Err(DbError::TransactionNotActive {
                tx: self.tx_id,
                state,
            }),
        }
    }

    /// Move to a terminal state, release all locks and unpin every buffer
    fn finish(&self, state: TxState) {
        self.state.set(state);
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
        self.active.lock().remove(&self.tx_id);
    }

    /// Commit this transaction.
    /// All data written by it is forced to disk and a [`crate::tx::log_record::LogRecord::Commit`]
    /// is flushed to the WAL before its locks are released. If the commit fails the
    /// transaction is rolled back and the commit error is returned.
    pub fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        match self.recovery_manager.commit() {
            Ok(()) => {
                self.finish(TxState::Committed);
                info!(tx = self.tx_id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(tx = self.tx_id, error = %e, "commit failed, rolling back");
                match self.recovery_manager.rollback(self) {
                    Ok(()) => self.finish(TxState::RolledBack),
                    Err(rollback_err) => {
                        warn!(tx = self.tx_id, error = %rollback_err, "rollback after failed commit also failed, keeping locks")
                    }
                }
                Err(e)
            }
        }
    }

    /// Undo every change made by this transaction and release its locks.
    ///
    /// If the undo fails partway the transaction stays active and keeps every lock and pin,
    /// so no other transaction sees a half restored block. Retry the rollback, or restart
    /// the database to let recovery finish the undo.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        if let Err(e) = self.recovery_manager.rollback(self) {
            warn!(tx = self.tx_id, error = %e, "rollback failed, keeping locks");
            return Err(e);
        }
        self.finish(TxState::RolledBack);
        info!(tx = self.tx_id, "transaction rolled back");
        Ok(())
    }

    /// Undo the work of every transaction that did not finish before the last shutdown.
    /// The transaction stays active and should be committed afterwards.
    pub fn recover(&self) -> Result<()> {
        self.ensure_active()?;
        self.recovery_manager.recover(self)?;
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
        Ok(())
    }

    /// Pin this [`BlockId`] to be used in this transaction
    pub fn pin(&self, block_id: &BlockId) -> Result<()> {
        self.ensure_active()?;
        self.buffer_list.pin(block_id)
    }

    /// Unpin this [`BlockId`] since it is no longer needed by this transaction
    pub fn unpin(&self, block_id: &BlockId) -> Result<()> {
        self.ensure_active()?;
        self.buffer_list.unpin(block_id)
    }

    /// Get an integer value in a pinned block
    pub fn get_int(&self, block_id: &BlockId, offset: usize) -> Result<i32> {
        self.ensure_active()?;
        let buffer = self.buffer_list.get_buffer(block_id)?;
        self.concurrency_manager.slock(block_id)?;
        let value = buffer.lock().contents().get_int(offset)?;
        Ok(value)
    }

    /// Get a string value in a pinned block
    pub fn get_string(&self, block_id: &BlockId, offset: usize) -> Result<String> {
        self.ensure_active()?;
        let buffer = self.buffer_list.get_buffer(block_id)?;
        self.concurrency_manager.slock(block_id)?;
        let value = buffer.lock().contents().get_string(offset)?;
        Ok(value)
    }

    /// Set an integer value in a pinned block.
    /// With `log` the previous value is written to the WAL first so it can be undone.
    pub fn set_int(&self, block_id: &BlockId, offset: usize, value: i32, log: bool) -> Result<()> {
        self.ensure_active()?;
        let buffer = self.buffer_list.get_buffer(block_id)?;
        self.concurrency_manager.xlock(block_id)?;
        let mut guard = buffer.lock();
        //  a write that cannot fit must fail before anything reaches the log
        guard.contents().get_int(offset)?;
        let lsn = if log {
            Some(self.recovery_manager.set_int(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_int(offset, value)?;
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Set a string value in a pinned block.
    /// With `log` the previous value is written to the WAL first so it can be undone.
    pub fn set_string(
        &self,
        block_id: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        let buffer = self.buffer_list.get_buffer(block_id)?;
        self.concurrency_manager.xlock(block_id)?;
        let mut guard = buffer.lock();
        guard.contents().check_string_fits(offset, value)?;
        let lsn = if log {
            Some(self.recovery_manager.set_string(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_string(offset, value)?;
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Get the available buffers in the pool
    pub fn available_buffs(&self) -> usize {
        self.buffer_manager.available()
    }

    /// Get the size of this file in blocks.
    /// Holds a shared lock on the end of the file so no other transaction can append meanwhile.
    pub fn size(&self, file_name: &str) -> Result<usize> {
        self.ensure_active()?;
        self.concurrency_manager
            .slock(&BlockId::end_of_file(file_name))?;
        let length = self.file_manager.lock().length(file_name)?;
        Ok(length)
    }

    /// Append a block to the file
    pub fn append(&self, file_name: &str) -> Result<BlockId> {
        self.ensure_active()?;
        self.concurrency_manager
            .xlock(&BlockId::end_of_file(file_name))?;
        let block_id = self.file_manager.lock().append(file_name)?;
        Ok(block_id)
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.file_manager.lock().blocksize()
    }
}

impl TransactionOperations for Transaction {
    fn pin(&self, block_id: &BlockId) -> Result<()> {
        Transaction::pin(self, block_id)
    }

    fn unpin(&self, block_id: &BlockId) -> Result<()> {
        Transaction::unpin(self, block_id)
    }

    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> Result<()> {
        Transaction::set_int(self, block_id, offset, val, log)
    }

    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool) -> Result<()> {
        Transaction::set_string(self, block_id, offset, val, log)
    }
}
