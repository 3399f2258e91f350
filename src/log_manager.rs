use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{DbError, Result},
    file_manager::{BlockId, FileManager},
    page::Page,
};

/// Log sequence number, assigned to each appended record in increasing order
pub type Lsn = usize;

/// Walks the log from the most recent record to the oldest one.
/// Each log block stores a boundary at offset 0 and its records between the boundary
/// and the end of the block, newest first.
pub struct LogIterator {
    file_manager: Arc<Mutex<FileManager>>,
    current_block: BlockId,
    page: Page,
    current_pos: usize,
    failed: bool,
}

impl LogIterator {
    fn new(file_manager: Arc<Mutex<FileManager>>, current_block: BlockId) -> Result<Self> {
        let block_size = file_manager.lock().blocksize();
        let mut iter = Self {
            file_manager,
            current_block,
            page: Page::new(block_size),
            current_pos: 0,
            failed: false,
        };
        iter.move_to_block()?;
        Ok(iter)
    }

    fn move_to_block(&mut self) -> Result<()> {
        self.file_manager
            .lock()
            .read(&self.current_block, &mut self.page)?;
        self.current_pos = read_boundary(&self.page, &self.current_block)?;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        while self.current_pos >= self.page.capacity() {
            if self.current_block.block_num == 0 {
                return Ok(None);
            }
            self.current_block =
                BlockId::new(self.current_block.filename.clone(), self.current_block.block_num - 1);
            self.move_to_block()?;
        }
        let record = self.page.get_bytes(self.current_pos)?;
        self.current_pos += Page::INT_BYTES + record.len();
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// The offset of the newest record in a log block, or the block size when it is empty
fn read_boundary(page: &Page, block_id: &BlockId) -> Result<usize> {
    let boundary = page.get_int(0)?;
    match usize::try_from(boundary) {
        Ok(pos) if (Page::INT_BYTES..=page.capacity()).contains(&pos) => Ok(pos),
        _ => Err(DbError::malformed(format!(
            "log block {block_id} has boundary {boundary} outside {}..={}",
            Page::INT_BYTES,
            page.capacity()
        ))),
    }
}

/// Append-only log made of fixed size blocks in a single file
#[derive(Debug)]
pub struct LogManager {
    file_manager: Arc<Mutex<FileManager>>,
    log_file: String,
    log_page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

impl LogManager {
    pub fn new(file_manager: Arc<Mutex<FileManager>>, log_file: &str) -> Result<Self> {
        let block_size = file_manager.lock().blocksize();
        let mut log_page = Page::new(block_size);
        let log_size = file_manager.lock().length(log_file)?;
        let current_block = if log_size == 0 {
            Self::append_new_block(&file_manager, log_file, &mut log_page)?
        } else {
            let block = BlockId::new(log_file, log_size - 1);
            file_manager.lock().read(&block, &mut log_page)?;
            block
        };
        Ok(Self {
            file_manager,
            log_file: log_file.to_string(),
            log_page,
            current_block,
            latest_lsn: 0,
            last_saved_lsn: 0,
        })
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.last_saved_lsn
    }

    /// Make sure every record up to and including `lsn` is on disk
    pub fn flush_lsn(&mut self, lsn: Lsn) -> Result<()> {
        if self.last_saved_lsn >= lsn {
            return Ok(());
        }
        self.flush_to_disk()
    }

    /// Write the bytes from log_page to disk for the current_block
    fn flush_to_disk(&mut self) -> Result<()> {
        self.file_manager
            .lock()
            .write(&self.current_block, &self.log_page)?;
        self.last_saved_lsn = self.latest_lsn;
        Ok(())
    }

    /// Write the log record to the log page, moving on to a fresh block when it does not fit
    pub fn append(&mut self, log_record: &[u8]) -> Result<Lsn> {
        let bytes_needed = log_record.len() + Page::INT_BYTES;
        if bytes_needed + Page::INT_BYTES > self.log_page.capacity() {
            return Err(DbError::LogRecordTooLarge {
                size: log_record.len(),
                capacity: self.log_page.capacity(),
            });
        }

        let mut boundary = read_boundary(&self.log_page, &self.current_block)?;
        if boundary.saturating_sub(bytes_needed) < Page::INT_BYTES {
            self.flush_to_disk()?;
            self.current_block =
                Self::append_new_block(&self.file_manager, &self.log_file, &mut self.log_page)?;
            boundary = read_boundary(&self.log_page, &self.current_block)?;
        }

        let record_pos = boundary - bytes_needed;
        self.log_page.set_bytes(record_pos, log_record)?;
        self.log_page.set_int(0, record_pos as i32)?;
        self.latest_lsn += 1;
        debug!(lsn = self.latest_lsn, bytes = log_record.len(), "appended log record");
        Ok(self.latest_lsn)
    }

    /// Append a new block to the log file, holding only a boundary pointer
    fn append_new_block(
        file_manager: &Arc<Mutex<FileManager>>,
        log_file: &str,
        log_page: &mut Page,
    ) -> Result<BlockId> {
        let mut file_manager = file_manager.lock();
        let block_id = file_manager.append(log_file)?;
        *log_page = Page::new(file_manager.blocksize());
        log_page.set_int(0, file_manager.blocksize() as i32)?;
        file_manager.write(&block_id, log_page)?;
        Ok(block_id)
    }

    /// Flush the log and iterate over its records, newest first
    pub fn iterator(&mut self) -> Result<LogIterator> {
        self.flush_to_disk()?;
        LogIterator::new(
            Arc::clone(&self.file_manager),
            BlockId::new(self.log_file.clone(), self.current_block.block_num),
        )
    }
}
