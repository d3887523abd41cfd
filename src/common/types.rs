use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; signed so that -1 can mark an absent page
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 is reserved for index metadata (root pointers)
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type; larger ids belong to younger transactions
pub type TxnId = u32;

/// Table object ID type
pub type TableOid = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record ID: the page a row lives on plus its slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

/// Page structure
#[derive(Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload and detach the page from any identity
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("lsn", &self.lsn)
            .finish()
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new() {
        let page = Page::new(7);
        assert_eq!(page.page_id, 7);
        assert_eq!(page.lsn, 0);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new(3);
        page.data[0] = 0xAB;
        page.lsn = 42;
        page.reset();
        assert_eq!(page.page_id, INVALID_PAGE_ID);
        assert_eq!(page.lsn, 0);
        assert_eq!(page.data[0], 0);
    }

    #[test]
    fn test_rid_ordering() {
        assert!(Rid::new(1, 2) < Rid::new(1, 3));
        assert!(Rid::new(1, 9) < Rid::new(2, 0));
        assert_eq!(Rid::new(5, 5), Rid::new(5, 5));
    }
}
