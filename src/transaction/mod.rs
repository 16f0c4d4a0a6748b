// Transaction management module

pub mod concurrency;

// Public exports
pub use concurrency::{
    IsolationLevel, LockAbortError, LockManager, LockMode, Transaction, TransactionManager,
    TransactionState,
};
