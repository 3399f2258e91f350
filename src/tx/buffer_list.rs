use std::{cell::RefCell, collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    buffer_manager::{Buffer, BufferManager},
    error::{DbError, Result},
    file_manager::BlockId,
};

struct PinnedBuffer {
    buffer: Arc<Mutex<Buffer>>,
    count: usize,
}

/// The buffers pinned by one transaction, with how many times each block was pinned
pub(crate) struct BufferList {
    buffers: RefCell<HashMap<BlockId, PinnedBuffer>>,
    buffer_manager: Arc<BufferManager>,
}

impl BufferList {
    pub(crate) fn new(buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            buffers: RefCell::new(HashMap::new()),
            buffer_manager,
        }
    }

    /// Get the buffer associated with the provided block_id
    pub(crate) fn get_buffer(&self, block_id: &BlockId) -> Result<Arc<Mutex<Buffer>>> {
        self.buffers
            .borrow()
            .get(block_id)
            .map(|pinned| Arc::clone(&pinned.buffer))
            .ok_or_else(|| DbError::BlockNotPinned(block_id.clone()))
    }

    pub(crate) fn pin(&self, block_id: &BlockId) -> Result<()> {
        let buffer = self.buffer_manager.pin(block_id)?;
        self.buffers
            .borrow_mut()
            .entry(block_id.clone())
            .and_modify(|pinned| pinned.count += 1)
            .or_insert(PinnedBuffer { buffer, count: 1 });
        Ok(())
    }

    pub(crate) fn unpin(&self, block_id: &BlockId) -> Result<()> {
        let mut buffers = self.buffers.borrow_mut();
        let pinned = buffers
            .get_mut(block_id)
            .ok_or_else(|| DbError::BlockNotPinned(block_id.clone()))?;
        self.buffer_manager.unpin(&pinned.buffer);
        pinned.count -= 1;
        if pinned.count == 0 {
            buffers.remove(block_id);
        }
        Ok(())
    }

    /// Release every pin this transaction still holds
    pub(crate) fn unpin_all(&self) {
        let mut buffers = self.buffers.borrow_mut();
        for pinned in buffers.values() {
            for _ in 0..pinned.count {
                self.buffer_manager.unpin(&pinned.buffer);
            }
        }
        buffers.clear();
    }

    #[cfg(test)]
    pub(crate) fn pin_count(&self, block_id: &BlockId) -> usize {
        self.buffers
            .borrow()
            .get(block_id)
            .map_or(0, |pinned| pinned.count)
    }
}

#[cfg(test)]
mod buffer_list_tests {
    use crate::{error::DbError, test_utils::test_db, tx::buffer_list::BufferList, BlockId};

    #[test]
    fn test_buffer_list_functionality() {
        let (db, _test_dir) = test_db(400, 3);
        let buffer_manager = db.buffer_manager();
        let buffer_list = BufferList::new(db.buffer_manager());

        let block_id = BlockId::new("testfile", 1);
        buffer_list.pin(&block_id).unwrap();
        buffer_list.pin(&block_id).unwrap();
        assert_eq!(buffer_list.pin_count(&block_id), 2);
        assert_eq!(buffer_manager.available(), 2);
        assert!(buffer_list.get_buffer(&block_id).is_ok());

        buffer_list.unpin(&block_id).unwrap();
        assert_eq!(buffer_list.pin_count(&block_id), 1);
        assert_eq!(buffer_manager.available(), 2);

        buffer_list.unpin(&block_id).unwrap();
        assert_eq!(buffer_manager.available(), 3);
        assert!(matches!(
            buffer_list.get_buffer(&block_id),
            Err(DbError::BlockNotPinned(_))
        ));
        assert!(matches!(
            buffer_list.unpin(&block_id),
            Err(DbError::BlockNotPinned(_))
        ));
    }

    #[test]
    fn test_unpin_all_releases_every_pin() {
        let (db, _test_dir) = test_db(400, 3);
        let buffer_manager = db.buffer_manager();
        let buffer_list = BufferList::new(db.buffer_manager());

        buffer_list.pin(&BlockId::new("testfile", 1)).unwrap();
        buffer_list.pin(&BlockId::new("testfile", 1)).unwrap();
        buffer_list.pin(&BlockId::new("testfile", 2)).unwrap();
        assert_eq!(buffer_manager.available(), 1);

        buffer_list.unpin_all();
        assert_eq!(buffer_manager.available(), 3);
        assert_eq!(buffer_list.pin_count(&BlockId::new("testfile", 1)), 0);
    }
}
