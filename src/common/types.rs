use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Page ID of a frame that holds no page
pub const INVALID_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Table OID type
pub type TableOid = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Record identifier: the page a record lives on plus its slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the contents and detach the page from its former identity
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;
