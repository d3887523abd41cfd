use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use log::debug;

use crate::common::config::DbConfig;
use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, LockSets, Transaction, TransactionError, TransactionState,
};

/// Hierarchical lock modes. Tables take all five; rows take only S and X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Standard multi-granularity compatibility matrix
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Legal upgrade paths: IS -> {S, IX, SIX, X}; S/IX -> {SIX, X}; SIX -> X
    pub fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, target),
            (IntentionShared, Shared)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (IntentionShared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    /// FIFO except that a pending upgrade sits ahead of other waiters
    requests: VecDeque<LockRequest>,
    /// At most one transaction may be mid-upgrade on a resource
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
        }
    }
}

/// Two-phase-locking lock manager with multi-granularity modes, lock
/// upgrades and waits-for deadlock detection.
///
/// Latch order is map latch before queue latch everywhere; waiters hold only
/// the queue latch, which the condvar releases while blocked.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<(TableOid, Rid), Arc<LockRequestQueue>>>,
    cycle_detection_interval: Duration,
    detector_running: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(cycle_detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            cycle_detection_interval,
            detector_running: AtomicBool::new(false),
            detector: Mutex::new(None),
        }
    }

    pub fn with_config(config: &DbConfig) -> Self {
        Self::new(config.cycle_detection_interval)
    }

    /// Acquire a table lock, blocking until granted.
    ///
    /// `Ok(true)` means granted; `Ok(false)` means the waiter woke up
    /// already marked ABORTED (deadlock victim) and unwound. Protocol
    /// violations return an error after setting the transaction to ABORTED.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        self.check_isolation_rules(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let mut state = queue.state.lock();

        // A repeated request by the holder is a no-op or an upgrade.
        let mut is_upgrade = false;
        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        {
            let held_mode = state.requests[pos].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if !held_mode.can_upgrade_to(mode) {
                drop(state);
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            if state.upgrading.is_some_and(|upgrader| upgrader != txn.id()) {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            let old = state.requests.remove(pos).expect("position just found");
            txn.with_lock_sets(|sets| remove_table_entry(sets, old.mode, oid));
            state.upgrading = Some(txn.id());
            is_upgrade = true;
        }

        self.enqueue_and_wait(&queue, &mut state, txn, mode, is_upgrade, |sets| {
            insert_table_entry(sets, mode, oid);
        })
    }

    /// Release a table lock, notifying waiters and applying the
    /// isolation-dependent transition to SHRINKING.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        let queue = self.table_lock_map.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        // Row locks on this table must go first.
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let released = state.requests.remove(pos).expect("position just found");
        queue.cv.notify_all();
        drop(state);

        txn.with_lock_sets(|sets| remove_table_entry(sets, released.mode, oid));
        self.maybe_shrink(txn, released.mode);
        Ok(())
    }

    /// Acquire a row lock. Rows only support S and X, and require the
    /// appropriate table-level lock to already be held.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_isolation_rules(txn, mode)?;

        let table_ok = match mode {
            LockMode::Exclusive => {
                txn.is_table_exclusive_locked(oid)
                    || txn.is_table_intention_exclusive_locked(oid)
                    || txn.is_table_shared_intention_exclusive_locked(oid)
            }
            _ => txn.holds_any_table_lock(oid),
        };
        if !table_ok {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry((oid, rid))
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let mut state = queue.state.lock();

        let mut is_upgrade = false;
        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        {
            let held_mode = state.requests[pos].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if !held_mode.can_upgrade_to(mode) {
                drop(state);
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            if state.upgrading.is_some_and(|upgrader| upgrader != txn.id()) {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            let old = state.requests.remove(pos).expect("position just found");
            txn.with_lock_sets(|sets| remove_row_entry(sets, old.mode, oid, rid));
            state.upgrading = Some(txn.id());
            is_upgrade = true;
        }

        self.enqueue_and_wait(&queue, &mut state, txn, mode, is_upgrade, |sets| {
            insert_row_entry(sets, mode, oid, rid);
        })
    }

    /// Release a row lock
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        let queue = self.row_lock_map.lock().get(&(oid, rid)).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let released = state.requests.remove(pos).expect("position just found");
        queue.cv.notify_all();
        drop(state);

        txn.with_lock_sets(|sets| remove_row_entry(sets, released.mode, oid, rid));
        self.maybe_shrink(txn, released.mode);
        Ok(())
    }

    /// Shared tail of the lock paths: enqueue (upgrades jump the waiters),
    /// wait until grantable, and record the granted lock.
    fn enqueue_and_wait(
        &self,
        queue: &Arc<LockRequestQueue>,
        state: &mut parking_lot::MutexGuard<'_, QueueState>,
        txn: &Arc<Transaction>,
        mode: LockMode,
        is_upgrade: bool,
        record_grant: impl FnOnce(&mut LockSets),
    ) -> Result<bool, TransactionError> {
        let request = LockRequest {
            txn: txn.clone(),
            mode,
            granted: false,
        };
        if is_upgrade {
            let pos = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(pos, request);
        } else {
            state.requests.push_back(request);
        }

        while !can_grant(&**state, txn.id()) {
            queue.cv.wait(state);
            // Spurious-wakeup safe: re-check the abort flag and the grant
            // condition every time.
            if txn.state() == TransactionState::Aborted {
                if is_upgrade {
                    state.upgrading = None;
                }
                state
                    .requests
                    .retain(|r| r.granted || r.txn.id() != txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
        }

        let request = state
            .requests
            .iter_mut()
            .find(|r| r.txn.id() == txn.id() && !r.granted)
            .expect("request vanished while waiting");
        request.granted = true;
        if is_upgrade {
            state.upgrading = None;
        }
        txn.with_lock_sets(record_grant);
        // Other compatible waiters at the head may now be grantable.
        queue.cv.notify_all();
        Ok(true)
    }

    /// Isolation-level preconditions for any acquire
    fn check_isolation_rules(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        use LockMode::*;
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if txn.state() == TransactionState::Shrinking
                    && matches!(mode, Exclusive | IntentionExclusive)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && matches!(mode, Exclusive | IntentionExclusive | SharedIntentionExclusive)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Releasing S under REPEATABLE_READ, or X under any level, moves the
    /// transaction into its shrinking phase (unless already resolved).
    fn maybe_shrink(&self, txn: &Arc<Transaction>, released: LockMode) {
        let transitions = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                matches!(released, LockMode::Exclusive)
            }
        };
        if transitions {
            let state = txn.state();
            if state != TransactionState::Committed && state != TransactionState::Aborted {
                txn.set_state(TransactionState::Shrinking);
            }
        }
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        debug!("txn {} aborted: {:?}", txn.id(), reason);
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// One pass of deadlock detection: build the waits-for graph under both
    /// map latches, abort the youngest member of every cycle, then wake all
    /// waiters so victims can unwind.
    pub fn detect_and_break_cycles(&self) {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();
        let queues: Vec<Arc<LockRequestQueue>> = table_map
            .values()
            .chain(row_map.values())
            .cloned()
            .collect();

        let mut edges: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut txns: HashMap<TxnId, Arc<Transaction>> = HashMap::new();
        for queue in &queues {
            let state = queue.state.lock();
            for waiter in state.requests.iter().filter(|r| !r.granted) {
                for holder in state.requests.iter().filter(|r| r.granted) {
                    if holder.txn.id() != waiter.txn.id()
                        && !holder.mode.is_compatible_with(waiter.mode)
                    {
                        edges
                            .entry(waiter.txn.id())
                            .or_default()
                            .insert(holder.txn.id());
                        txns.insert(waiter.txn.id(), waiter.txn.clone());
                        txns.insert(holder.txn.id(), holder.txn.clone());
                    }
                }
            }
        }

        let mut aborted_any = false;
        while let Some(victim) = find_cycle_victim(&edges) {
            debug!("deadlock detected, aborting youngest txn {}", victim);
            if let Some(txn) = txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            edges.remove(&victim);
            for targets in edges.values_mut() {
                targets.remove(&victim);
            }
            aborted_any = true;
        }

        if aborted_any {
            for queue in &queues {
                queue.cv.notify_all();
            }
        }
    }

    /// Run detection on a background thread every `cycle_detection_interval`
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        if self.detector_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.cycle_detection_interval;
        let handle = std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            let Some(lock_manager) = weak.upgrade() else {
                break;
            };
            if !lock_manager.detector_running.load(Ordering::SeqCst) {
                break;
            }
            lock_manager.detect_and_break_cycles();
        });
        *self.detector.lock() = Some(handle);
    }

    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.get_mut().take() {
            let _ = handle.join();
        }
    }
}

/// A request can be granted when it is compatible with every granted request
/// and no other waiter precedes it (upgrades were enqueued at the front).
fn can_grant(state: &QueueState, txn_id: TxnId) -> bool {
    let Some(me) = state
        .requests
        .iter()
        .find(|r| r.txn.id() == txn_id && !r.granted)
    else {
        return true;
    };
    let my_mode = me.mode;

    for request in &state.requests {
        if request.granted {
            if request.txn.id() != txn_id && !request.mode.is_compatible_with(my_mode) {
                return false;
            }
        } else {
            return request.txn.id() == txn_id;
        }
    }
    false
}

fn insert_table_entry(sets: &mut LockSets, mode: LockMode, oid: TableOid) {
    match mode {
        LockMode::Shared => sets.shared_table.insert(oid),
        LockMode::Exclusive => sets.exclusive_table.insert(oid),
        LockMode::IntentionShared => sets.intention_shared_table.insert(oid),
        LockMode::IntentionExclusive => sets.intention_exclusive_table.insert(oid),
        LockMode::SharedIntentionExclusive => sets.shared_intention_exclusive_table.insert(oid),
    };
}

fn remove_table_entry(sets: &mut LockSets, mode: LockMode, oid: TableOid) {
    match mode {
        LockMode::Shared => sets.shared_table.remove(&oid),
        LockMode::Exclusive => sets.exclusive_table.remove(&oid),
        LockMode::IntentionShared => sets.intention_shared_table.remove(&oid),
        LockMode::IntentionExclusive => sets.intention_exclusive_table.remove(&oid),
        LockMode::SharedIntentionExclusive => sets.shared_intention_exclusive_table.remove(&oid),
    };
}

fn insert_row_entry(sets: &mut LockSets, mode: LockMode, oid: TableOid, rid: Rid) {
    match mode {
        LockMode::Shared => sets.shared_rows.entry(oid).or_default().insert(rid),
        LockMode::Exclusive => sets.exclusive_rows.entry(oid).or_default().insert(rid),
        _ => unreachable!("row locks are S or X only"),
    };
}

fn remove_row_entry(sets: &mut LockSets, mode: LockMode, oid: TableOid, rid: Rid) {
    match mode {
        LockMode::Shared => {
            if let Some(rows) = sets.shared_rows.get_mut(&oid) {
                rows.remove(&rid);
            }
        }
        LockMode::Exclusive => {
            if let Some(rows) = sets.exclusive_rows.get_mut(&oid) {
                rows.remove(&rid);
            }
        }
        _ => unreachable!("row locks are S or X only"),
    }
}

/// DFS over the waits-for graph in ascending txn-id order; a back edge
/// yields the cycle, whose youngest (largest id) member is the victim.
fn find_cycle_victim(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    fn dfs(
        node: TxnId,
        edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<TxnId> {
        if let Some(pos) = path.iter().position(|&t| t == node) {
            return path[pos..].iter().copied().max();
        }
        if visited.contains(&node) {
            return None;
        }
        visited.insert(node);
        path.push(node);
        if let Some(targets) = edges.get(&node) {
            for &next in targets {
                if let Some(victim) = dfs(next, edges, visited, path) {
                    return Some(victim);
                }
            }
        }
        path.pop();
        None
    }

    let mut visited = BTreeSet::new();
    for &start in edges.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(victim) = dfs(start, edges, &mut visited, &mut path) {
            return Some(victim);
        }
    }
    None
}
