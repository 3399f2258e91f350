use std::{cell::Cell, collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    buffer_manager::{Buffer, BufferManager},
    error::{DbError, Result},
    file_manager::BlockId,
    log_manager::Lsn,
    tx::{log_record::LogRecord, TransactionOperations},
    LogManager, TransactionID,
};

/// Writes the WAL records for one transaction and drives its commit, rollback and
/// crash recovery. Recovery is undo-only: committed data is forced to disk at commit.
pub struct RecoveryManager {
    tx_num: TransactionID,
    log_manager: Arc<Mutex<LogManager>>,
    buffer_manager: Arc<BufferManager>,
    last_lsn: Cell<Option<Lsn>>,
}

impl RecoveryManager {
    /// Create the manager and write the [`LogRecord::Start`] record for the transaction
    pub fn new(
        tx_num: TransactionID,
        log_manager: Arc<Mutex<LogManager>>,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        let manager = Self {
            tx_num,
            log_manager,
            buffer_manager,
            last_lsn: Cell::new(None),
        };
        manager.write(LogRecord::Start(tx_num))?;
        Ok(manager)
    }

    /// The most recent LSN written on behalf of this transaction
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.last_lsn.get()
    }

    fn write(&self, record: LogRecord) -> Result<Lsn> {
        let lsn = record.write_to_log(&self.log_manager)?;
        debug!(tx = self.tx_num, lsn, %record, "appended log record");
        self.last_lsn.set(Some(lsn));
        Ok(lsn)
    }

    fn write_and_flush(&self, record: LogRecord) -> Result<()> {
        let lsn = self.write(record)?;
        self.log_manager.lock().flush_lsn(lsn)
    }

    /// Commit the transaction.
    /// Its dirty buffers are forced to disk before the [`LogRecord::Commit`] record is written
    /// and the log is flushed through it.
    pub fn commit(&self) -> Result<()> {
        if let Some(lsn) = self.last_lsn.get() {
            self.log_manager.lock().flush_lsn(lsn)?;
        }
        self.buffer_manager.flush_all(self.tx_num)?;
        self.write_and_flush(LogRecord::Commit(self.tx_num))
    }

    /// Undo every update made by this transaction, newest first, then write a
    /// [`LogRecord::Rollback`] record and flush it
    pub fn rollback(&self, tx: &dyn TransactionOperations) -> Result<()> {
        let log_iter = self.log_manager.lock().iterator()?;
        let mut undone = 0;
        for bytes in log_iter {
            let record = LogRecord::try_from(bytes?.as_slice())?;
            if record.tx_number() != Some(self.tx_num) {
                continue;
            }
            if let LogRecord::Start(_) = record {
                break;
            }
            record.undo(tx)?;
            undone += 1;
        }
        self.buffer_manager.flush_all(self.tx_num)?;
        self.write_and_flush(LogRecord::Rollback(self.tx_num))?;
        debug!(tx = self.tx_num, undone, "rolled back");
        Ok(())
    }

    /// Undo every update of the transactions that never finished, then write a quiescent
    /// [`LogRecord::Checkpoint`].
    ///
    /// The scan runs newest first and stops at the first quiescent checkpoint. At a
    /// [`LogRecord::NqCheckpoint`] the listed transactions that are still unfinished become
    /// the only ones whose older records matter, and the scan stops once each of them has
    /// either its [`LogRecord::Start`] or an earlier commit or rollback behind it.
    pub fn recover(&self, tx: &dyn TransactionOperations) -> Result<()> {
        self.buffer_manager.flush_all(self.tx_num)?;
        let log_iter = self.log_manager.lock().iterator()?;
        let mut finished: HashSet<TransactionID> = HashSet::new();
        let mut pending: Option<HashSet<TransactionID>> = None;
        let mut undone = 0;
        let mut scanned = 0;
        for bytes in log_iter {
            let record = LogRecord::try_from(bytes?.as_slice())?;
            scanned += 1;
            match &record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                    finished.insert(*txnum);
                    //  a transaction can still be listed by a checkpoint written just after it finished
                    if let Some(unfinished) = pending.as_mut() {
                        unfinished.remove(txnum);
                        if unfinished.is_empty() {
                            break;
                        }
                    }
                }
                LogRecord::NqCheckpoint(active) => {
                    //  only the most recent checkpoint bounds the scan
                    if pending.is_some() {
                        continue;
                    }
                    let unfinished: HashSet<TransactionID> = active
                        .iter()
                        .copied()
                        .filter(|txnum| !finished.contains(txnum))
                        .collect();
                    if unfinished.is_empty() {
                        break;
                    }
                    pending = Some(unfinished);
                }
                LogRecord::Start(txnum) => {
                    if let Some(unfinished) = pending.as_mut() {
                        unfinished.remove(txnum);
                        if unfinished.is_empty() {
                            break;
                        }
                    }
                }
                LogRecord::SetInt { txnum, .. } | LogRecord::SetString { txnum, .. } => {
                    let needs_undo = !finished.contains(txnum)
                        && pending
                            .as_ref()
                            .map_or(true, |unfinished| unfinished.contains(txnum));
                    if needs_undo {
                        record.undo(tx)?;
                        undone += 1;
                    }
                }
            }
        }
        self.buffer_manager.flush_all(self.tx_num)?;
        self.write_and_flush(LogRecord::Checkpoint)?;
        info!(tx = self.tx_num, scanned, undone, "recovery complete");
        Ok(())
    }

    /// Log the current integer at `offset` in the buffer so that it can be restored later
    pub fn set_int(&self, buffer: &Buffer, offset: usize) -> Result<Lsn> {
        let block_id = Self::assigned_block(buffer)?;
        let old_val = buffer.contents().get_int(offset)?;
        self.write(LogRecord::SetInt {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val,
        })
    }

    /// Log the current string at `offset` in the buffer so that it can be restored later
    pub fn set_string(&self, buffer: &Buffer, offset: usize) -> Result<Lsn> {
        let block_id = Self::assigned_block(buffer)?;
        let old_val = buffer.contents().get_string(offset)?;
        self.write(LogRecord::SetString {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val,
        })
    }

    fn assigned_block(buffer: &Buffer) -> Result<BlockId> {
        buffer
            .block_id()
            .cloned()
            .ok_or_else(|| DbError::malformed("cannot log an update to a buffer with no block"))
    }

    /// Append and flush a [`LogRecord::NqCheckpoint`] naming the transactions still running
    pub fn checkpoint(
        log_manager: &Mutex<LogManager>,
        active: Vec<TransactionID>,
    ) -> Result<Lsn> {
        let record = LogRecord::NqCheckpoint(active);
        let lsn = record.write_to_log(log_manager)?;
        log_manager.lock().flush_lsn(lsn)?;
        info!(lsn, %record, "wrote checkpoint");
        Ok(lsn)
    }
}
