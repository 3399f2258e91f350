use std::time::Duration;

/// Settings fixed when a [`crate::SimpleDB`] is opened
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Size in bytes of every block in every file, the log included.
    /// Default: 400
    pub block_size: usize,
    /// Number of buffers in the buffer pool.
    /// Default: 8
    pub num_buffers: usize,
    /// How long a lock request may wait before the transaction is aborted.
    /// Default: 10s
    pub lock_timeout: Duration,
    /// How long a pin may wait for a free buffer.
    /// Default: 10s
    pub buffer_timeout: Duration,
    /// Name of the log file inside the database directory.
    /// Default: simpledb.log
    pub log_file: String,
    pub transaction: TransactionConfig,
}

impl DbConfig {
    pub const LOG_FILE: &'static str = "simpledb.log";

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_num_buffers(mut self, num_buffers: usize) -> Self {
        self.num_buffers = num_buffers;
        self
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            block_size: 400,
            num_buffers: 8,
            lock_timeout: Duration::from_secs(10),
            buffer_timeout: Duration::from_secs(10),
            log_file: Self::LOG_FILE.to_string(),
            transaction: TransactionConfig::default(),
        }
    }
}

/// Retry behaviour of [`crate::SimpleDB::run_transaction`]
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub max_retries: usize,
    pub retry_backoff_base_ms: u64,
    pub max_retry_backoff_ms: u64,
}

impl TransactionConfig {
    /// Backoff before retry number `attempt + 1`: doubles each attempt, capped at the max
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
        let ms = self
            .retry_backoff_base_ms
            .saturating_mul(factor)
            .min(self.max_retry_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_base_ms: 1,
            max_retry_backoff_ms: 100,
        }
    }
}

#[cfg(test)]
mod config_tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransactionConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(1));
        assert_eq!(config.backoff(3), Duration::from_millis(8));
        assert_eq!(config.backoff(10), Duration::from_millis(100));
        assert_eq!(config.backoff(200), Duration::from_millis(100));
    }
}
