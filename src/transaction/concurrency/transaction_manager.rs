use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockMode};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Transaction manager - responsible for creating and tearing down
/// transactions. Commit and abort both release every lock the transaction
/// still holds, rows before tables.
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager releasing locks on commit/abort
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions
            .lock()
            .unwrap()
            .insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction and release its locks
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
        self.active_transactions.lock().unwrap().remove(&txn.id());
    }

    /// Abort a transaction and release its locks
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.active_transactions.lock().unwrap().remove(&txn.id());
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().unwrap().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().unwrap().keys().copied().collect()
    }

    /// Hand every held lock back to the lock manager. Row locks go first so
    /// the table unlocks are legal. The transaction is already in a terminal
    /// state, so no phase transition fires.
    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            for (oid, rids) in txn.row_lock_set(mode) {
                for rid in rids {
                    self.lock_manager.unlock_row(txn, oid, rid).ok();
                }
            }
        }
        for mode in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            for oid in txn.table_lock_set(mode) {
                self.lock_manager.unlock_table(txn, oid).ok();
            }
        }
    }
}
