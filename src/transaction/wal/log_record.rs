use thiserror::Error;
use serde::{Serialize, Deserialize};
use bincode::{serialize, deserialize};

use crate::common::types::{Lsn, TxnId};

/// Error type for log record operations
#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize log record: {0}")]
    DeserializationError(String),
}

pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Types of log records accepted by the log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    /// Marks the beginning of a transaction
    Begin,
    /// Marks the successful completion of a transaction
    Commit,
    /// Marks the abortion/rollback of a transaction
    Abort,
}

/// Main log record structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log Sequence Number - unique identifier for this log record
    pub lsn: Lsn,
    /// Transaction ID that generated this log record
    pub txn_id: TxnId,
    /// LSN of the previous log record in this transaction
    pub prev_lsn: Lsn,
    /// Type of operation this log record represents
    pub record_type: LogRecordType,
    /// Wall-clock seconds when the record was created
    pub timestamp: u64,
}

impl LogRecord {
    pub fn new(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            timestamp,
        }
    }

    /// Serialize the record to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self).map_err(|e| LogRecordError::SerializationError(e.to_string()))
    }

    /// Deserialize a record from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes).map_err(|e| LogRecordError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serde_roundtrip() {
        let record = LogRecord::new(7, 3, 6, LogRecordType::Commit);
        let bytes = record.serialize().unwrap();
        let decoded = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded.lsn, 7);
        assert_eq!(decoded.txn_id, 3);
        assert_eq!(decoded.prev_lsn, 6);
        assert_eq!(decoded.record_type, LogRecordType::Commit);
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        assert!(LogRecord::deserialize(&[0xFF; 3]).is_err());
    }
}
