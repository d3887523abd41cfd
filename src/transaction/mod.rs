// Transaction management: WAL sink, transactions, locking

pub mod wal;
pub mod concurrency;

pub use concurrency::{
    IsolationLevel, LockManager, Transaction, TransactionError, TransactionManager,
    TransactionState,
};
