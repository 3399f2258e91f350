use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    error::Result, file_manager::BlockId, log_manager::Lsn, page::Page, FileManager, LogManager,
    TransactionID,
};

/// An in-memory slot of the buffer pool holding the contents of one block
#[derive(Debug)]
pub struct Buffer {
    file_manager: Arc<Mutex<FileManager>>,
    log_manager: Arc<Mutex<LogManager>>,
    contents: Page,
    block_id: Option<BlockId>,
    pins: usize,
    txn: Option<TransactionID>,
    lsn: Option<Lsn>,
}

impl Buffer {
    pub(crate) fn new(
        file_manager: Arc<Mutex<FileManager>>,
        log_manager: Arc<Mutex<LogManager>>,
    ) -> Self {
        let size = file_manager.lock().blocksize();
        Self {
            file_manager,
            log_manager,
            contents: Page::new(size),
            block_id: None,
            pins: 0,
            txn: None,
            lsn: None,
        }
    }

    pub fn contents(&self) -> &Page {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.contents
    }

    pub fn block_id(&self) -> Option<&BlockId> {
        self.block_id.as_ref()
    }

    /// The transaction that last modified this buffer, if it is dirty
    pub fn modifying_tx(&self) -> Option<TransactionID> {
        self.txn
    }

    /// Mark that this buffer has been modified by `txn_num`.
    /// `lsn` is the log record describing the change, `None` for unlogged writes.
    pub fn set_modified(&mut self, txn_num: TransactionID, lsn: Option<Lsn>) {
        self.txn = Some(txn_num);
        if lsn.is_some() {
            self.lsn = lsn;
        }
    }

    /// Check whether the buffer is pinned in memory
    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    /// Modify this buffer to hold the contents of a different block,
    /// flushing the existing page contents first if dirty
    pub(crate) fn assign_to_block(&mut self, block_id: &BlockId) -> Result<()> {
        self.flush()?;
        self.block_id = Some(block_id.clone());
        self.file_manager.lock().read(block_id, &mut self.contents)?;
        self.pins = 0;
        Ok(())
    }

    /// Write the current buffer contents to disk if dirty.
    /// The log is flushed up to this buffer's LSN first.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.txn.is_none() {
            return Ok(());
        }
        if let Some(lsn) = self.lsn {
            self.log_manager.lock().flush_lsn(lsn)?;
        }
        if let Some(block_id) = &self.block_id {
            self.file_manager.lock().write(block_id, &self.contents)?;
        }
        self.txn = None;
        Ok(())
    }

    pub(crate) fn pin(&mut self) {
        self.pins += 1;
    }

    pub(crate) fn unpin(&mut self) {
        debug_assert!(self.pins > 0, "unpin of a buffer with no pins");
        self.pins = self.pins.saturating_sub(1);
    }
}
