//! Transactions and the machinery behind them: locking, logging and recovery.

mod buffer_list;
pub mod concurrency_manager;
pub mod lock_table;
pub mod log_record;
pub mod recovery_manager;
mod transaction;

pub use transaction::Transaction;

use crate::{error::Result, file_manager::BlockId};

/// The operations a log record needs in order to undo itself
pub trait TransactionOperations {
    fn pin(&self, block_id: &BlockId) -> Result<()>;
    fn unpin(&self, block_id: &BlockId) -> Result<()>;
    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> Result<()>;
    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool) -> Result<()>;
}
