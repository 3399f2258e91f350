//! The lock table shared by every transaction of a database.
//!
//! All state sits behind one mutex. A request that cannot be granted waits on a single
//! condition variable, which is broadcast on every unlock, and re-checks its condition
//! on wake since another waiter may have won the block in the meantime.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::Debug,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{
    error::{AbortReason, DbError, Result},
    file_manager::BlockId,
    TransactionID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// The holders of a locked block. An unlocked block has no entry in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// Shared holders in the order they were granted, never empty
    Shared(Vec<TransactionID>),
    Exclusive(TransactionID),
}

impl LockState {
    pub fn holders(&self) -> &[TransactionID] {
        match self {
            LockState::Shared(holders) => holders,
            LockState::Exclusive(holder) => std::slice::from_ref(holder),
        }
    }

    /// The most recently granted holder
    pub fn last_holder(&self) -> Option<TransactionID> {
        self.holders().last().copied()
    }

    pub fn is_held_by(&self, tx_id: TransactionID) -> bool {
        self.holders().contains(&tx_id)
    }

    fn has_other_holders(&self, tx_id: TransactionID) -> bool {
        self.holders().iter().any(|holder| *holder != tx_id)
    }

    fn is_exclusive_for_other(&self, tx_id: TransactionID) -> bool {
        matches!(self, LockState::Exclusive(holder) if *holder != tx_id)
    }
}

/// Decides whether a lock request is refused up front instead of waiting.
pub trait StarvationPolicy: Debug + Send + Sync {
    fn should_abort(&self, state: &LockState, tx_id: TransactionID, requested: LockType) -> bool;
}

/// Compares the requester against the most recently granted holder only.
///
/// A shared request aborts when that holder is exclusive and older (numerically smaller)
/// than the requester. An exclusive request aborts when that holder, of either mode, is
/// older than the requester. Older shared holders granted before the last one are never
/// consulted, so this is an incomplete form of wait-die.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastHolderPolicy;

impl StarvationPolicy for LastHolderPolicy {
    fn should_abort(&self, state: &LockState, tx_id: TransactionID, requested: LockType) -> bool {
        let Some(last) = state.last_holder() else {
            return false;
        };
        if last == tx_id {
            return false;
        }
        match requested {
            LockType::Shared => matches!(state, LockState::Exclusive(_)) && tx_id > last,
            LockType::Exclusive => tx_id > last,
        }
    }
}

/// Never refuses up front; only the wait timeout applies
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStarvationGuard;

impl StarvationPolicy for NoStarvationGuard {
    fn should_abort(&self, _: &LockState, _: TransactionID, _: LockType) -> bool {
        false
    }
}

/// Global struct used by all transactions to keep track of locks
#[derive(Debug)]
pub struct LockTable {
    lock_table: Mutex<HashMap<BlockId, LockState>>,
    cond_var: Condvar,
    timeout: Duration,
    policy: Box<dyn StarvationPolicy>,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self::with_policy(timeout, Box::new(LastHolderPolicy))
    }

    pub fn with_policy(timeout: Duration, policy: Box<dyn StarvationPolicy>) -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
            cond_var: Condvar::new(),
            timeout,
            policy,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Snapshot of the holders of `block_id`, `None` when it is unlocked
    pub fn lock_state(&self, block_id: &BlockId) -> Option<LockState> {
        self.lock_table.lock().get(block_id).cloned()
    }

    /// Acquire a shared lock on a [`BlockId`] for a transaction.
    /// Waits while another transaction holds an exclusive lock on the block.
    pub fn shared_lock(&self, block_id: &BlockId, tx_id: TransactionID) -> Result<()> {
        let mut lock_table = self.lock_table.lock();
        if let Some(state) = lock_table.get(block_id) {
            if state.is_held_by(tx_id) {
                return Ok(());
            }
            if self.policy.should_abort(state, tx_id, LockType::Shared) {
                return Err(Self::abort(block_id, tx_id, AbortReason::Starvation));
            }
        }

        let deadline = Instant::now() + self.timeout;
        while lock_table
            .get(block_id)
            .is_some_and(|state| state.is_exclusive_for_other(tx_id))
        {
            debug!(tx_id, %block_id, "waiting for shared lock");
            if self.cond_var.wait_until(&mut lock_table, deadline).timed_out()
                && lock_table
                    .get(block_id)
                    .is_some_and(|state| state.is_exclusive_for_other(tx_id))
            {
                return Err(Self::abort(block_id, tx_id, AbortReason::Timeout));
            }
        }

        match lock_table.entry(block_id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(LockState::Shared(vec![tx_id]));
            }
            Entry::Occupied(mut entry) => {
                //  an exclusive entry here can only be our own
                if let LockState::Shared(holders) = entry.get_mut() {
                    if !holders.contains(&tx_id) {
                        holders.push(tx_id);
                    }
                }
            }
        }
        debug!(tx_id, %block_id, "granted shared lock");
        Ok(())
    }

    /// Acquire an exclusive lock on a [`BlockId`] for a transaction.
    /// Waits until no other transaction holds any lock on the block.
    pub fn exclusive_lock(&self, block_id: &BlockId, tx_id: TransactionID) -> Result<()> {
        let mut lock_table = self.lock_table.lock();
        if let Some(state) = lock_table.get(block_id) {
            if *state == LockState::Exclusive(tx_id) {
                return Ok(());
            }
            if self.policy.should_abort(state, tx_id, LockType::Exclusive) {
                return Err(Self::abort(block_id, tx_id, AbortReason::Starvation));
            }
        }

        let deadline = Instant::now() + self.timeout;
        while lock_table
            .get(block_id)
            .is_some_and(|state| state.has_other_holders(tx_id))
        {
            debug!(tx_id, %block_id, "waiting for exclusive lock");
            if self.cond_var.wait_until(&mut lock_table, deadline).timed_out()
                && lock_table
                    .get(block_id)
                    .is_some_and(|state| state.has_other_holders(tx_id))
            {
                return Err(Self::abort(block_id, tx_id, AbortReason::Timeout));
            }
        }

        lock_table.insert(block_id.clone(), LockState::Exclusive(tx_id));
        debug!(tx_id, %block_id, "granted exclusive lock");
        Ok(())
    }

    /// Release whatever lock `tx_id` holds on `block_id` and wake all waiters
    pub fn unlock(&self, block_id: &BlockId, tx_id: TransactionID) {
        let mut lock_table = self.lock_table.lock();
        if let Entry::Occupied(mut entry) = lock_table.entry(block_id.clone()) {
            let now_empty = match entry.get_mut() {
                LockState::Shared(holders) => {
                    holders.retain(|holder| *holder != tx_id);
                    holders.is_empty()
                }
                LockState::Exclusive(holder) => *holder == tx_id,
            };
            if now_empty {
                entry.remove();
            }
        }
        self.cond_var.notify_all();
    }

    fn abort(block_id: &BlockId, tx_id: TransactionID, reason: AbortReason) -> DbError {
        warn!(tx_id, %block_id, %reason, "lock request aborted");
        DbError::LockAbort {
            tx: tx_id,
            block: block_id.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod lock_table_tests {
    use std::{
        sync::{
            atomic::{AtomicI32, Ordering},
            mpsc, Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::test_utils::generate_filename;

    fn abort_reason(result: Result<()>) -> AbortReason {
        match result {
            Err(DbError::LockAbort { reason, .. }) => reason,
            other => panic!("expected a lock abort, got {other:?}"),
        }
    }

    #[test]
    fn test_basic_shared_lock() {
        let lock_table = LockTable::new(Duration::from_secs(10));
        let block_id = BlockId::new(generate_filename(), 1);

        lock_table.shared_lock(&block_id, 1).unwrap();
        lock_table.shared_lock(&block_id, 2).unwrap();
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Shared(vec![1, 2]))
        );

        lock_table.unlock(&block_id, 1);
        lock_table.unlock(&block_id, 2);
        assert_eq!(lock_table.lock_state(&block_id), None);
    }

    #[test]
    fn test_younger_shared_request_against_older_exclusive_aborts_immediately() {
        let lock_table = LockTable::new(Duration::from_secs(10));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.exclusive_lock(&block_id, 1).unwrap();

        let start = Instant::now();
        let reason = abort_reason(lock_table.shared_lock(&block_id, 2));
        assert_eq!(reason, AbortReason::Starvation);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_older_shared_request_waits_then_times_out() {
        let lock_table = LockTable::new(Duration::from_millis(50));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.exclusive_lock(&block_id, 5).unwrap();

        let start = Instant::now();
        let reason = abort_reason(lock_table.shared_lock(&block_id, 3));
        assert_eq!(reason, AbortReason::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Exclusive(5))
        );
    }

    #[test]
    fn test_older_shared_request_granted_after_release() {
        let lock_table = Arc::new(LockTable::new(Duration::from_secs(10)));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.exclusive_lock(&block_id, 5).unwrap();
        let (tx, rx) = mpsc::channel::<&str>();

        let lt = Arc::clone(&lock_table);
        let bid = block_id.clone();
        let handle = thread::spawn(move || {
            tx.send("waiting").unwrap();
            lt.shared_lock(&bid, 3).unwrap();
            tx.send("granted").unwrap();
        });

        assert_eq!(rx.recv().unwrap(), "waiting");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        lock_table.unlock(&block_id, 5);
        assert_eq!(rx.recv().unwrap(), "granted");
        handle.join().unwrap();
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Shared(vec![3]))
        );
    }

    #[test]
    fn test_lock_upgrade() {
        let lock_table = Arc::new(LockTable::new(Duration::from_secs(1)));
        let block_id = BlockId::new(generate_filename(), 1);
        let (tx, rx) = mpsc::channel::<String>();

        lock_table.shared_lock(&block_id, 1).unwrap();
        lock_table.shared_lock(&block_id, 2).unwrap();

        //  T1 is older than the last holder T2 so it waits for T2 instead of aborting
        let lt1 = Arc::clone(&lock_table);
        let bid1 = block_id.clone();
        let j1 = thread::spawn(move || {
            tx.send("Acquiring write lock".to_string()).unwrap();
            lt1.exclusive_lock(&bid1, 1).unwrap();
            tx.send("Acquired write lock".to_string()).unwrap();
        });

        assert_eq!(rx.recv().unwrap(), "Acquiring write lock");
        lock_table.unlock(&block_id, 2);
        assert_eq!(rx.recv().unwrap(), "Acquired write lock");
        j1.join().unwrap();
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Exclusive(1))
        );
    }

    #[test]
    fn test_younger_exclusive_request_aborts_against_any_last_holder() {
        let lock_table = LockTable::new(Duration::from_secs(10));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.shared_lock(&block_id, 1).unwrap();
        lock_table.shared_lock(&block_id, 2).unwrap();

        let reason = abort_reason(lock_table.exclusive_lock(&block_id, 3));
        assert_eq!(reason, AbortReason::Starvation);
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Shared(vec![1, 2]))
        );
    }

    #[test]
    fn test_policy_only_consults_last_holder() {
        let lock_table = LockTable::new(Duration::from_millis(20));
        let block_id = BlockId::new(generate_filename(), 1);
        //  T4 is granted after T1, so T3 only compares itself against T4
        lock_table.shared_lock(&block_id, 1).unwrap();
        lock_table.shared_lock(&block_id, 4).unwrap();

        let reason = abort_reason(lock_table.exclusive_lock(&block_id, 3));
        assert_eq!(reason, AbortReason::Timeout);
    }

    #[test]
    fn test_no_starvation_guard_waits_instead_of_aborting() {
        let lock_table = Arc::new(LockTable::with_policy(
            Duration::from_secs(10),
            Box::new(NoStarvationGuard),
        ));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.exclusive_lock(&block_id, 1).unwrap();

        let lt = Arc::clone(&lock_table);
        let bid = block_id.clone();
        let handle = thread::spawn(move || lt.shared_lock(&bid, 2));

        thread::sleep(Duration::from_millis(20));
        lock_table.unlock(&block_id, 1);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_unlock_by_non_holder_is_a_no_op() {
        let lock_table = LockTable::new(Duration::from_secs(1));
        let block_id = BlockId::new(generate_filename(), 1);
        lock_table.exclusive_lock(&block_id, 1).unwrap();

        lock_table.unlock(&block_id, 2);
        assert_eq!(
            lock_table.lock_state(&block_id),
            Some(LockState::Exclusive(1))
        );
        lock_table.unlock(&BlockId::new(generate_filename(), 9), 1);
    }

    #[test]
    fn test_readers_and_writers_never_overlap() {
        let lock_table = Arc::new(LockTable::with_policy(
            Duration::from_secs(10),
            Box::new(NoStarvationGuard),
        ));
        let block_id = BlockId::new(generate_filename(), 1);
        let readers = Arc::new(AtomicI32::new(0));
        let writers = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (1..=8)
            .map(|tx_id| {
                let lt = Arc::clone(&lock_table);
                let bid = block_id.clone();
                let readers = Arc::clone(&readers);
                let writers = Arc::clone(&writers);
                thread::spawn(move || {
                    for _ in 0..50 {
                        lt.shared_lock(&bid, tx_id).unwrap();
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers.load(Ordering::SeqCst), 0);
                        readers.fetch_sub(1, Ordering::SeqCst);
                        lt.unlock(&bid, tx_id);

                        lt.exclusive_lock(&bid, tx_id).unwrap();
                        assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        writers.fetch_sub(1, Ordering::SeqCst);
                        lt.unlock(&bid, tx_id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock_table.lock_state(&block_id), None);
    }
}
