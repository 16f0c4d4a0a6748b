// Export public modules
pub mod common;
pub mod container;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use container::ExtendibleHashTable;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use storage::page::BTreeLeafPage;
pub use transaction::{IsolationLevel, LockManager, LockMode, Transaction, TransactionManager};
