use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O: synchronous, page-sized block
/// reads and writes addressed by page id.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file backing this disk manager
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into the provided page buffer.
    ///
    /// Reading a page the file has never held yields zeroed bytes; page ids
    /// are allocated by the buffer pool, so the file may simply not have
    /// grown that far yet.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        if offset >= file_size {
            page.data = [0; PAGE_SIZE];
            page.page_id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Number of pages the backing file currently holds
    pub fn num_pages(&self) -> Result<u64, DiskManagerError> {
        let file = self.db_file.lock();
        let len = file.metadata()?.len();
        Ok(len.div_ceil(PAGE_SIZE as u64))
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_then_read() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(2);
        page.data[0] = 0xDE;
        page.data[PAGE_SIZE - 1] = 0xAD;
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(0);
        disk.read_page(2, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, 2);
        assert_eq!(read_back.data[0], 0xDE);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xAD);
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(0);
        page.data[10] = 0xFF;
        disk.read_page(9, &mut page).unwrap();
        assert_eq!(page.page_id, 9);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negative_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(0);
        assert!(disk.read_page(-1, &mut page).is_err());
        page.page_id = -1;
        assert!(disk.write_page(&page).is_err());
    }
}
