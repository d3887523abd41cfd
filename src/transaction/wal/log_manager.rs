use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::wal::log_record::{LogRecord, LogRecordError, LogRecordType};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Log record error: {0}")]
    LogRecordError(#[from] LogRecordError),
}

pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Directory the log file lives in
    pub log_dir: PathBuf,
    /// Name of the log file
    pub log_file_name: String,
    /// Whether to sync to disk on every commit/abort record
    pub force_sync: bool,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file_name: "sayandb_log".to_string(),
            force_sync: true,
        }
    }
}

/// Append-only sink for transaction log records.
///
/// The engine core treats durability as someone else's problem: records go
/// out through this interface and are never read back here. There is no
/// recovery or checkpointing on this side of the boundary.
pub struct LogManager {
    config: LogManagerConfig,
    log_file: Mutex<File>,
    /// Next LSN to hand out
    next_lsn: AtomicU64,
}

impl LogManager {
    pub fn new(config: LogManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.log_dir)?;

        let path = config.log_dir.join(&config.log_file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            config,
            log_file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
        })
    }

    /// Append a log record, returning the LSN it was assigned.
    ///
    /// Records are framed as a little-endian u32 length followed by the
    /// bincode payload.
    pub fn append_log_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
    ) -> Result<Lsn> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord::new(lsn, txn_id, prev_lsn, record_type);
        let payload = record.serialize()?;

        let mut file = self.log_file.lock();
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;

        if self.config.force_sync
            && matches!(record_type, LogRecordType::Commit | LogRecordType::Abort)
        {
            file.sync_data()?;
        }

        Ok(lsn)
    }

    /// Force everything written so far out to disk
    pub fn flush(&self) -> Result<()> {
        let mut file = self.log_file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// The LSN the next appended record will receive
    pub fn current_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }
}
