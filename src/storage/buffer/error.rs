use thiserror::Error;
use crate::common::types::{FrameId, PageId};
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum ReplacerError {
    #[error("Replacer is full, frame {0} was not admitted")]
    Full(FrameId),
}

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("No free frames available")]
    NoFreeFrames,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Replacer error: {0}")]
    ReplacerError(#[from] ReplacerError),
}
