use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecordType;

/// Creates and tracks transactions, writing Begin/Commit/Abort records to
/// the log sink on the corresponding transitions.
pub struct TransactionManager {
    /// Next transaction ID to assign; larger ids are younger
    next_txn_id: AtomicU32,
    log_manager: Arc<LogManager>,
    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            log_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction in the GROWING state
    pub fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Arc<Transaction>, TransactionError> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        let lsn = self
            .log_manager
            .append_log_record(txn_id, 0, LogRecordType::Begin)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_first_lsn(lsn);
        txn.set_last_lsn(lsn);

        self.active_transactions.lock().insert(txn_id, txn.clone());
        Ok(txn)
    }

    /// Commit a transaction; it must not already be resolved
    pub fn commit_transaction(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or_else(|| {
                TransactionError::InternalError(format!("transaction {} not found", txn_id))
            })?;

        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn_id));
            }
            _ => {}
        }

        let lsn = self
            .log_manager
            .append_log_record(txn_id, txn.last_lsn(), LogRecordType::Commit)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_last_lsn(lsn);
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Abort a transaction. Aborting a deadlock victim (already marked
    /// ABORTED by the detector) is fine; committing one is not.
    pub fn abort_transaction(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or_else(|| {
                TransactionError::InternalError(format!("transaction {} not found", txn_id))
            })?;

        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn_id));
        }

        let lsn = self
            .log_manager
            .append_log_record(txn_id, txn.last_lsn(), LogRecordType::Abort)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_last_lsn(lsn);
        txn.set_state(TransactionState::Aborted);
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn transaction_exists(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}
