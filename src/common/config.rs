use std::time::Duration;

/// Configuration for the buffer pool manager
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool
    pub pool_size: usize,

    /// K parameter of the LRU-K replacement policy
    pub replacer_k: usize,

    /// Bucket capacity of the extendible hash directory used as the page table
    pub page_table_bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
            page_table_bucket_size: 4,
        }
    }
}

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How long the background deadlock detector sleeps between passes
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}
