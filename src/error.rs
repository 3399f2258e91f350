use std::fmt::Display;

use thiserror::Error;

use crate::{file_manager::BlockId, page::PageError, TransactionID};

pub type Result<T> = std::result::Result<T, DbError>;

/// Why the lock table refused to grant a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The starvation policy rejected the request before it started waiting
    Starvation,
    /// The request waited longer than the configured lock timeout
    Timeout,
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Starvation => write!(f, "starvation guard"),
            AbortReason::Timeout => write!(f, "timed out"),
        }
    }
}

/// The state a [`crate::Transaction`] is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("page error: {0}")]
    Page(#[from] PageError),

    #[error("lock abort for transaction {tx} on {block}: {reason}")]
    LockAbort {
        tx: TransactionID,
        block: BlockId,
        reason: AbortReason,
    },

    #[error("timed out waiting for a free buffer to pin {0}")]
    BufferAbort(BlockId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed log record: {0}")]
    MalformedLogRecord(String),

    #[error("log record of {size} bytes does not fit in a {capacity} byte log block")]
    LogRecordTooLarge { size: usize, capacity: usize },

    #[error("block {0} is not pinned by this transaction")]
    BlockNotPinned(BlockId),

    #[error("transaction {tx} is {state}")]
    TransactionNotActive { tx: TransactionID, state: TxState },
}

impl DbError {
    pub fn is_lock_abort(&self) -> bool {
        matches!(self, DbError::LockAbort { .. })
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        DbError::MalformedLogRecord(msg.into())
    }
}
