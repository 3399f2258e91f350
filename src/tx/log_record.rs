//! The records written to the write-ahead log.
//!
//! Wire format, every int is 4 bytes big-endian:
//! - `op` first
//! - START / COMMIT / ROLLBACK: `txnum`
//! - SETINT: `txnum`, filename (length + UTF-8 bytes), block number, offset, old int
//! - SETSTRING: same as SETINT with the old string as length + UTF-8 bytes
//! - CHECKPOINT / NQCKPT: count followed by that many transaction numbers
//!   (always zero for a quiescent checkpoint)

use std::fmt::Display;

use parking_lot::Mutex;

use crate::{
    error::{DbError, Result},
    file_manager::BlockId,
    log_manager::Lsn,
    page::Page,
    tx::TransactionOperations,
    LogManager, TransactionID,
};

/// The container for all the different types of log records that are written to the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start(TransactionID),
    Commit(TransactionID),
    Rollback(TransactionID),
    SetInt {
        txnum: TransactionID,
        block_id: BlockId,
        offset: usize,
        old_val: i32,
    },
    SetString {
        txnum: TransactionID,
        block_id: BlockId,
        offset: usize,
        old_val: String,
    },
    /// Non-quiescent checkpoint listing the transactions active when it was written
    NqCheckpoint(Vec<TransactionID>),
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "Checkpoint"),
            LogRecord::Start(txnum) => write!(f, "Start({})", txnum),
            LogRecord::Commit(txnum) => write!(f, "Commit({})", txnum),
            LogRecord::Rollback(txnum) => write!(f, "Rollback({})", txnum),
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(
                f,
                "SetInt(txnum: {}, block_id: {}, offset: {}, old_val: {})",
                txnum, block_id, offset, old_val
            ),
            LogRecord::SetString {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(
                f,
                "SetString(txnum: {}, block_id: {}, offset: {}, old_val: {:?})",
                txnum, block_id, offset, old_val
            ),
            LogRecord::NqCheckpoint(active) => write!(f, "NqCheckpoint({:?})", active),
        }
    }
}

impl TryFrom<&LogRecord> for Vec<u8> {
    type Error = DbError;

    fn try_from(record: &LogRecord) -> Result<Vec<u8>> {
        let mut page = Page::new(record.calculate_size());
        let mut pos = 0;
        page.set_int(pos, record.op())?;
        pos += Page::INT_BYTES;
        match record {
            LogRecord::Start(txnum) | LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                page.set_int(pos, *txnum)?;
            }
            LogRecord::Checkpoint => {
                page.set_int(pos, 0)?;
            }
            LogRecord::NqCheckpoint(active) => {
                page.set_int(pos, encode_usize(active.len(), "transaction count")?)?;
                for txnum in active {
                    pos += Page::INT_BYTES;
                    page.set_int(pos, *txnum)?;
                }
            }
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                old_val,
            } => {
                pos = write_update_header(&mut page, pos, *txnum, block_id, *offset)?;
                page.set_int(pos, *old_val)?;
            }
            LogRecord::SetString {
                txnum,
                block_id,
                offset,
                old_val,
            } => {
                pos = write_update_header(&mut page, pos, *txnum, block_id, *offset)?;
                page.set_bytes(pos, old_val.as_bytes())?;
            }
        }
        Ok(page.into_bytes())
    }
}

impl TryFrom<&[u8]> for LogRecord {
    type Error = DbError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let mut reader = RecordReader::new(bytes);
        let record = match reader.int()? {
            LogRecord::CHECKPOINT => {
                let count = reader.int()?;
                if count != 0 {
                    return Err(DbError::malformed(format!(
                        "quiescent checkpoint lists {count} transactions"
                    )));
                }
                LogRecord::Checkpoint
            }
            LogRecord::START => LogRecord::Start(reader.int()?),
            LogRecord::COMMIT => LogRecord::Commit(reader.int()?),
            LogRecord::ROLLBACK => LogRecord::Rollback(reader.int()?),
            LogRecord::SETINT => {
                let (txnum, block_id, offset) = reader.update_header()?;
                LogRecord::SetInt {
                    txnum,
                    block_id,
                    offset,
                    old_val: reader.int()?,
                }
            }
            LogRecord::SETSTRING => {
                let (txnum, block_id, offset) = reader.update_header()?;
                LogRecord::SetString {
                    txnum,
                    block_id,
                    offset,
                    old_val: reader.string("old value")?,
                }
            }
            LogRecord::NQCKPT => {
                let count = reader.non_negative("transaction count")?;
                let active = (0..count)
                    .map(|_| reader.int())
                    .collect::<Result<Vec<_>>>()?;
                LogRecord::NqCheckpoint(active)
            }
            op => return Err(DbError::malformed(format!("unknown operation code {op}"))),
        };
        reader.finish()?;
        Ok(record)
    }
}

impl LogRecord {
    pub const CHECKPOINT: i32 = 0;
    pub const START: i32 = 1;
    pub const COMMIT: i32 = 2;
    pub const ROLLBACK: i32 = 3;
    pub const SETINT: i32 = 4;
    pub const SETSTRING: i32 = 5;
    pub const NQCKPT: i32 = 6;

    fn calculate_size(&self) -> usize {
        let ints = |n: usize| n * Page::INT_BYTES;
        let update_header = |block_id: &BlockId| ints(5) + block_id.filename.len();
        match self {
            LogRecord::Start(_) | LogRecord::Commit(_) | LogRecord::Rollback(_) => ints(2),
            LogRecord::Checkpoint => ints(2),
            LogRecord::NqCheckpoint(active) => ints(2 + active.len()),
            //  op, txnum, filename length, block number, offset and the old int
            LogRecord::SetInt { block_id, .. } => update_header(block_id) + ints(1),
            LogRecord::SetString {
                block_id, old_val, ..
            } => update_header(block_id) + ints(1) + old_val.len(),
        }
    }

    /// The operation code written at the start of the record
    pub fn op(&self) -> i32 {
        match self {
            LogRecord::Checkpoint => Self::CHECKPOINT,
            LogRecord::Start(_) => Self::START,
            LogRecord::Commit(_) => Self::COMMIT,
            LogRecord::Rollback(_) => Self::ROLLBACK,
            LogRecord::SetInt { .. } => Self::SETINT,
            LogRecord::SetString { .. } => Self::SETSTRING,
            LogRecord::NqCheckpoint(_) => Self::NQCKPT,
        }
    }

    /// The transaction that owns this record. Checkpoints belong to no transaction.
    pub fn tx_number(&self) -> Option<TransactionID> {
        match self {
            LogRecord::Start(txnum) | LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                Some(*txnum)
            }
            LogRecord::SetInt { txnum, .. } | LogRecord::SetString { txnum, .. } => Some(*txnum),
            LogRecord::Checkpoint | LogRecord::NqCheckpoint(_) => None,
        }
    }

    /// Restore the value this record logged. Only updates have anything to undo.
    /// The restoring write is not itself logged.
    pub fn undo(&self, tx: &dyn TransactionOperations) -> Result<()> {
        match self {
            LogRecord::SetInt {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_int(block_id, *offset, *old_val, false);
                tx.unpin(block_id)?;
                result
            }
            LogRecord::SetString {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_string(block_id, *offset, old_val, false);
                tx.unpin(block_id)?;
                result
            }
            _ => Ok(()),
        }
    }

    /// Serialize the log record and append it to the log
    pub fn write_to_log(&self, log_manager: &Mutex<LogManager>) -> Result<Lsn> {
        let bytes: Vec<u8> = self.try_into()?;
        log_manager.lock().append(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<LogRecord> {
        LogRecord::try_from(bytes)
    }
}

fn encode_usize(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| DbError::malformed(format!("{what} {value} does not fit in a log record")))
}

fn write_update_header(
    page: &mut Page,
    mut pos: usize,
    txnum: TransactionID,
    block_id: &BlockId,
    offset: usize,
) -> Result<usize> {
    page.set_int(pos, txnum)?;
    pos += Page::INT_BYTES;
    page.set_bytes(pos, block_id.filename.as_bytes())?;
    pos += Page::INT_BYTES + block_id.filename.len();
    page.set_int(pos, encode_usize(block_id.block_num, "block number")?)?;
    pos += Page::INT_BYTES;
    page.set_int(pos, encode_usize(offset, "offset")?)?;
    Ok(pos + Page::INT_BYTES)
}

/// Sequential decoder that turns every short read into a malformed-record error
struct RecordReader {
    page: Page,
    pos: usize,
}

impl RecordReader {
    fn new(bytes: &[u8]) -> Self {
        Self {
            page: Page::from_bytes(bytes.to_vec()),
            pos: 0,
        }
    }

    fn int(&mut self) -> Result<i32> {
        let value = self
            .page
            .get_int(self.pos)
            .map_err(|e| DbError::malformed(format!("truncated record: {e}")))?;
        self.pos += Page::INT_BYTES;
        Ok(value)
    }

    fn non_negative(&mut self, what: &str) -> Result<usize> {
        let value = self.int()?;
        usize::try_from(value).map_err(|_| DbError::malformed(format!("negative {what} {value}")))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let bytes = self
            .page
            .get_bytes(self.pos)
            .map_err(|e| DbError::malformed(format!("truncated {what}: {e}")))?;
        self.pos += Page::INT_BYTES + bytes.len();
        String::from_utf8(bytes).map_err(|_| DbError::malformed(format!("{what} is not UTF-8")))
    }

    fn update_header(&mut self) -> Result<(TransactionID, BlockId, usize)> {
        let txnum = self.int()?;
        let filename = self.string("filename")?;
        let block_num = self.non_negative("block number")?;
        let offset = self.non_negative("offset")?;
        Ok((txnum, BlockId::new(filename, block_num), offset))
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.page.capacity() {
            return Err(DbError::malformed(format!(
                "{} trailing bytes after record",
                self.page.capacity() - self.pos
            )));
        }
        Ok(())
    }
}
