//! The buffer pool consumed by transactions.
//!
//! Replacement is deliberately naive: an existing buffer for the block is reused,
//! otherwise the first unpinned buffer is recycled. Callers that cannot get a buffer
//! wait until one is unpinned, up to the configured timeout.

mod buffer;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

pub use buffer::Buffer;

use crate::{
    error::{DbError, Result},
    file_manager::BlockId,
    FileManager, LogManager, TransactionID,
};

pub struct BufferManager {
    buffer_pool: Vec<Arc<Mutex<Buffer>>>,
    num_available: Mutex<usize>,
    cond: Condvar,
    max_wait: Duration,
}

impl BufferManager {
    pub fn new(
        file_manager: Arc<Mutex<FileManager>>,
        log_manager: Arc<Mutex<LogManager>>,
        num_buffers: usize,
        max_wait: Duration,
    ) -> Self {
        let buffer_pool = (0..num_buffers)
            .map(|_| {
                Arc::new(Mutex::new(Buffer::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                )))
            })
            .collect();
        Self {
            buffer_pool,
            num_available: Mutex::new(num_buffers),
            cond: Condvar::new(),
            max_wait,
        }
    }

    /// Returns the number of unpinned buffers
    pub fn available(&self) -> usize {
        *self.num_available.lock()
    }

    /// Flushes the dirty buffers modified by this specific transaction
    pub fn flush_all(&self, txn_num: TransactionID) -> Result<()> {
        for buffer in &self.buffer_pool {
            let mut buffer = buffer.lock();
            if buffer.modifying_tx() == Some(txn_num) {
                buffer.flush()?;
            }
        }
        Ok(())
    }

    /// Pin a buffer to the provided block, waiting for one to become free if needed
    pub fn pin(&self, block_id: &BlockId) -> Result<Arc<Mutex<Buffer>>> {
        let deadline = Instant::now() + self.max_wait;
        let mut num_available = self.num_available.lock();
        loop {
            if let Some(buffer) = self.try_to_pin(block_id)? {
                {
                    let mut buffer_guard = buffer.lock();
                    if !buffer_guard.is_pinned() {
                        *num_available -= 1;
                    }
                    buffer_guard.pin();
                }
                return Ok(buffer);
            }
            debug!(%block_id, "waiting for an unpinned buffer");
            if self.cond.wait_until(&mut num_available, deadline).timed_out() {
                warn!(%block_id, "timed out waiting for a buffer");
                return Err(DbError::BufferAbort(block_id.clone()));
            }
        }
    }

    /// Decrement the pin count for the provided buffer and wake waiters once it is free
    pub fn unpin(&self, buffer: &Arc<Mutex<Buffer>>) {
        let mut num_available = self.num_available.lock();
        let mut buffer_guard = buffer.lock();
        buffer_guard.unpin();
        if !buffer_guard.is_pinned() {
            *num_available += 1;
            self.cond.notify_all();
        }
    }

    /// Find a buffer for this block: an existing one, else a recycled unpinned one
    fn try_to_pin(&self, block_id: &BlockId) -> Result<Option<Arc<Mutex<Buffer>>>> {
        if let Some(buffer) = self.find_existing_buffer(block_id) {
            return Ok(Some(buffer));
        }
        match self.choose_unpinned_buffer() {
            Some(buffer) => {
                buffer.lock().assign_to_block(block_id)?;
                Ok(Some(buffer))
            }
            None => Ok(None),
        }
    }

    fn find_existing_buffer(&self, block_id: &BlockId) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| buffer.lock().block_id() == Some(block_id))
            .map(Arc::clone)
    }

    fn choose_unpinned_buffer(&self) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| !buffer.lock().is_pinned())
            .map(Arc::clone)
    }
}
