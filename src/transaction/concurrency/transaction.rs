// Transaction handle observed by the lock manager.
// Created and torn down by the transaction manager.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction acquires locks while GROWING,
/// moves to SHRINKING on its first releasing unlock, and never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Growing = 0,
    Shrinking = 1,
    Committed = 2,
    Aborted = 3,
}

impl TransactionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TransactionState::Growing,
            1 => TransactionState::Shrinking,
            2 => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }
}

/// Locks a transaction currently holds, grouped the way the lock manager
/// hands them out: one table set per mode, row sets for S and X only.
#[derive(Debug, Default)]
struct HeldLocks {
    shared_tables: HashSet<TableOid>,
    exclusive_tables: HashSet<TableOid>,
    intention_shared_tables: HashSet<TableOid>,
    intention_exclusive_tables: HashSet<TableOid>,
    shared_intention_exclusive_tables: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<Rid>>,
    exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl HeldLocks {
    fn table_set(&self, mode: LockMode) -> &HashSet<TableOid> {
        match mode {
            LockMode::Shared => &self.shared_tables,
            LockMode::Exclusive => &self.exclusive_tables,
            LockMode::IntentionShared => &self.intention_shared_tables,
            LockMode::IntentionExclusive => &self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_tables,
        }
    }

    fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    fn row_set(&self, mode: LockMode) -> &HashMap<TableOid, HashSet<Rid>> {
        match mode {
            LockMode::Shared => &self.shared_rows,
            LockMode::Exclusive => &self.exclusive_rows,
            _ => panic!("rows only carry S or X locks"),
        }
    }

    fn row_set_mut(&mut self, mode: LockMode) -> &mut HashMap<TableOid, HashSet<Rid>> {
        match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => panic!("rows only carry S or X locks"),
        }
    }
}

/// An active transaction. The handle is shared between the owning thread and
/// the deadlock detector, so state and lock bookkeeping are internally
/// synchronized.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: AtomicU8,
    held: Mutex<HeldLocks>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: AtomicU8::new(TransactionState::Growing as u8),
            held: Mutex::new(HeldLocks::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Callers keep transitions monotonic; the deadlock detector only ever
    /// moves a transaction to ABORTED.
    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether this transaction holds `mode` on the table
    pub fn is_table_locked(&self, oid: TableOid, mode: LockMode) -> bool {
        self.held.lock().unwrap().table_set(mode).contains(&oid)
    }

    /// Whether this transaction holds `mode` on the row
    pub fn is_row_locked(&self, oid: TableOid, rid: Rid, mode: LockMode) -> bool {
        self.held
            .lock()
            .unwrap()
            .row_set(mode)
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
    }

    /// Whether any row of the table is still locked by this transaction
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let held = self.held.lock().unwrap();
        held.shared_rows.get(&oid).is_some_and(|rids| !rids.is_empty())
            || held.exclusive_rows.get(&oid).is_some_and(|rids| !rids.is_empty())
    }

    /// Tables locked in `mode`, as a snapshot
    pub fn table_lock_set(&self, mode: LockMode) -> HashSet<TableOid> {
        self.held.lock().unwrap().table_set(mode).clone()
    }

    /// Rows locked in `mode`, as a snapshot
    pub fn row_lock_set(&self, mode: LockMode) -> HashMap<TableOid, HashSet<Rid>> {
        self.held.lock().unwrap().row_set(mode).clone()
    }

    pub(crate) fn holds_table_lock_any(&self, oid: TableOid, modes: &[LockMode]) -> bool {
        let held = self.held.lock().unwrap();
        modes.iter().any(|&mode| held.table_set(mode).contains(&oid))
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.held.lock().unwrap().table_set_mut(mode).insert(oid);
    }

    pub(crate) fn erase_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.held.lock().unwrap().table_set_mut(mode).remove(&oid);
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        self.held
            .lock()
            .unwrap()
            .row_set_mut(mode)
            .entry(oid)
            .or_default()
            .insert(rid);
    }

    pub(crate) fn erase_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut held = self.held.lock().unwrap();
        if let Some(rids) = held.row_set_mut(mode).get_mut(&oid) {
            rids.remove(&rid);
        }
    }
}
