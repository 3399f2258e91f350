use std::{cell::RefCell, collections::HashMap, sync::Arc};

use crate::{
    error::Result,
    file_manager::BlockId,
    tx::lock_table::{LockTable, LockType},
    TransactionID,
};

/// Per-transaction view of the [`LockTable`]. Remembers which locks the transaction
/// already holds so the shared table is only consulted when something changes.
pub struct ConcurrencyManager {
    lock_table: Arc<LockTable>,
    locks: RefCell<HashMap<BlockId, LockType>>,
    tx_id: TransactionID,
}

impl ConcurrencyManager {
    pub fn new(tx_id: TransactionID, lock_table: Arc<LockTable>) -> Self {
        Self {
            lock_table,
            locks: RefCell::new(HashMap::new()),
            tx_id,
        }
    }

    /// The lock this transaction holds on `block_id`, if any
    pub fn held(&self, block_id: &BlockId) -> Option<LockType> {
        self.locks.borrow().get(block_id).copied()
    }

    /// Acquire a shared lock on a [`BlockId`] unless any lock is already held on it
    pub fn slock(&self, block_id: &BlockId) -> Result<()> {
        if self.held(block_id).is_some() {
            return Ok(());
        }
        self.lock_table.shared_lock(block_id, self.tx_id)?;
        self.locks
            .borrow_mut()
            .insert(block_id.clone(), LockType::Shared);
        Ok(())
    }

    /// Acquire an exclusive lock on a [`BlockId`].
    /// A shared lock is taken first when none is held, then upgraded.
    pub fn xlock(&self, block_id: &BlockId) -> Result<()> {
        match self.held(block_id) {
            Some(LockType::Exclusive) => return Ok(()),
            Some(LockType::Shared) => {}
            None => self.slock(block_id)?,
        }
        self.lock_table.exclusive_lock(block_id, self.tx_id)?;
        self.locks
            .borrow_mut()
            .insert(block_id.clone(), LockType::Exclusive);
        Ok(())
    }

    /// Release all locks associated with the transaction
    pub fn release(&self) {
        let mut locks = self.locks.borrow_mut();
        for block_id in locks.keys() {
            self.lock_table.unlock(block_id, self.tx_id);
        }
        locks.clear();
    }
}
