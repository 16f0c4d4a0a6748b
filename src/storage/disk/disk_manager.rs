use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// File-backed page store. Ids come from a monotonic counter seeded with the
/// number of pages already on disk; the file itself only grows when a page is
/// first written, so a page that was allocated but never written reads back
/// as zeroes.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicU32,
    /// Ids handed back by `deallocate_page`, kept so callers can observe
    /// which ids are no longer live
    deallocated: Mutex<HashSet<PageId>>,
}

impl DiskManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let pages_on_disk = file_size.div_ceil(PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicU32::new(pages_on_disk + 1),
            deallocated: Mutex::new(HashSet::new()),
        })
    }

    /// Fill `buf` with the page's bytes. Anything the file does not cover
    /// yet reads as zeroes.
    pub fn read_page(
        &self,
        page_id: PageId,
        buf: &mut [u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        let offset = offset_of(page_id)?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Write the page's bytes at its slot in the file
    pub fn write_page(
        &self,
        page_id: PageId,
        buf: &[u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        let offset = offset_of(page_id)?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Hand out the next page id. Ids increase monotonically starting at 1,
    /// so 0 stays invalid.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Mark a page id as no longer in use. The file is not shrunk and the id
    /// is not reissued.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.deallocated.lock().insert(page_id);
    }

    /// Whether a page id has been deallocated
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.deallocated.lock().contains(&page_id)
    }
}

fn offset_of(page_id: PageId) -> Result<u64, DiskManagerError> {
    if page_id == INVALID_PAGE_ID {
        return Err(DiskManagerError::InvalidPageId(page_id));
    }
    Ok(u64::from(page_id - 1) * PAGE_SIZE as u64)
}
