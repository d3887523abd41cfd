// Represents an active database transaction and its two-phase-locking state

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TableOid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager aborted a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockSharedOnReadUncommitted,
    LockOnShrinking,
    IncompatibleUpgrade,
    UpgradeConflict,
    TableLockNotPresent,
    AttemptedIntentionLockOnRow,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {txn_id} aborted: {reason:?}")]
    Abort { txn_id: TxnId, reason: AbortReason },

    #[error("transaction {0} is not in a state that allows this operation")]
    InvalidState(TxnId),

    #[error("failed to write to WAL: {0}")]
    LogError(String),

    #[error("internal transaction error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// The locks a transaction currently holds, grouped by mode.
///
/// Table locks live in one set per mode; row locks are keyed by table.
#[derive(Default)]
pub struct LockSets {
    pub shared_table: HashSet<TableOid>,
    pub exclusive_table: HashSet<TableOid>,
    pub intention_shared_table: HashSet<TableOid>,
    pub intention_exclusive_table: HashSet<TableOid>,
    pub shared_intention_exclusive_table: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

/// An active transaction, shared between the caller, the lock manager and
/// the deadlock detector (all mutation goes through interior mutability).
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    lock_sets: Mutex<LockSets>,
    first_lsn: AtomicU64,
    last_lsn: AtomicU64,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
            first_lsn: AtomicU64::new(0),
            last_lsn: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Run `f` with exclusive access to the lock sets
    pub fn with_lock_sets<R>(&self, f: impl FnOnce(&mut LockSets) -> R) -> R {
        f(&mut self.lock_sets.lock())
    }

    pub fn is_table_shared_locked(&self, oid: TableOid) -> bool {
        self.lock_sets.lock().shared_table.contains(&oid)
    }

    pub fn is_table_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets.lock().exclusive_table.contains(&oid)
    }

    pub fn is_table_intention_shared_locked(&self, oid: TableOid) -> bool {
        self.lock_sets.lock().intention_shared_table.contains(&oid)
    }

    pub fn is_table_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets.lock().intention_exclusive_table.contains(&oid)
    }

    pub fn is_table_shared_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets
            .lock()
            .shared_intention_exclusive_table
            .contains(&oid)
    }

    pub fn holds_any_table_lock(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_table.contains(&oid)
            || sets.exclusive_table.contains(&oid)
            || sets.intention_shared_table.contains(&oid)
            || sets.intention_exclusive_table.contains(&oid)
            || sets.shared_intention_exclusive_table.contains(&oid)
    }

    pub fn is_row_shared_locked(&self, oid: TableOid, rid: Rid) -> bool {
        self.lock_sets
            .lock()
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    pub fn is_row_exclusive_locked(&self, oid: TableOid, rid: Rid) -> bool {
        self.lock_sets
            .lock()
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    /// True while this table still has row locks held by the transaction
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || sets.exclusive_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
    }

    pub fn first_lsn(&self) -> Lsn {
        self.first_lsn.load(Ordering::SeqCst)
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn.load(Ordering::SeqCst)
    }

    pub fn set_first_lsn(&self, lsn: Lsn) {
        self.first_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn set_last_lsn(&self, lsn: Lsn) {
        self.last_lsn.store(lsn, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_new() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
        assert_eq!(txn.first_lsn(), 0);
        assert_eq!(txn.last_lsn(), 0);
    }

    #[test]
    fn test_state_transitions() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
        txn.set_state(TransactionState::Committed);
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn test_lock_set_predicates() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        assert!(!txn.holds_any_table_lock(7));

        txn.with_lock_sets(|sets| {
            sets.intention_exclusive_table.insert(7);
            sets.exclusive_rows.entry(7).or_default().insert(Rid::new(1, 2));
        });

        assert!(txn.is_table_intention_exclusive_locked(7));
        assert!(txn.holds_any_table_lock(7));
        assert!(!txn.is_table_shared_locked(7));
        assert!(txn.is_row_exclusive_locked(7, Rid::new(1, 2)));
        assert!(txn.holds_row_locks_on(7));
        assert!(!txn.holds_row_locks_on(8));

        txn.with_lock_sets(|sets| {
            sets.exclusive_rows.get_mut(&7).unwrap().remove(&Rid::new(1, 2));
        });
        assert!(!txn.holds_row_locks_on(7));
    }
}
