// Transaction concurrency module: the 2PL lock manager and the transaction
// handles it observes.

pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

// Public exports
pub use lock_manager::{LockAbortError, LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
