use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::common::config::LockManagerConfig;
use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Hierarchical lock modes. Intention modes are table-only and announce
/// row-level activity underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

impl LockMode {
    fn index(self) -> usize {
        match self {
            LockMode::Shared => 0,
            LockMode::Exclusive => 1,
            LockMode::IntentionShared => 2,
            LockMode::IntentionExclusive => 3,
            LockMode::SharedIntentionExclusive => 4,
        }
    }

    fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

// Rows and columns ordered S, X, IS, IX, SIX.
#[rustfmt::skip]
const COMPATIBILITY: [[bool; 5]; 5] = [
    [true,  false, true,  false, false], // S
    [false, false, false, false, false], // X
    [true,  false, true,  true,  true ], // IS
    [false, false, true,  true,  false], // IX
    [false, false, true,  false, false], // SIX
];

// Allowed upgrade paths: IS -> {S, X, IX, SIX}, S -> {X, SIX},
// IX -> {X, SIX}, SIX -> {X}.
#[rustfmt::skip]
const UPGRADES: [[bool; 5]; 5] = [
    [false, true,  false, false, true ], // S
    [false, false, false, false, false], // X
    [true,  true,  false, true,  true ], // IS
    [false, true,  false, false, true ], // IX
    [false, true,  false, false, false], // SIX
];

fn compatible(held: LockMode, requested: LockMode) -> bool {
    COMPATIBILITY[held.index()][requested.index()]
}

fn can_upgrade(from: LockMode, to: LockMode) -> bool {
    UPGRADES[from.index()][to.index()]
}

/// Whether releasing `mode` pushes the transaction into its shrinking phase
fn shrinks_on_unlock(mode: LockMode, isolation_level: IsolationLevel) -> bool {
    match mode {
        LockMode::Exclusive => true,
        LockMode::Shared => isolation_level == IsolationLevel::RepeatableRead,
        _ => false,
    }
}

/// Protocol violations that abort the offending transaction. The lock
/// manager sets the transaction to ABORTED before surfacing one of these;
/// the caller is expected to restart the transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAbortError {
    #[error("transaction {0} requested a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("transaction {0} requested a shared lock under read uncommitted")]
    LockSharedOnReadUncommitted(TxnId),

    #[error("transaction {0} requested an upgrade while another upgrade was pending")]
    UpgradeConflict(TxnId),

    #[error("transaction {0} requested a disallowed lock upgrade")]
    IncompatibleUpgrade(TxnId),

    #[error("transaction {0} released a lock it does not hold")]
    AttemptedUnlockButNoLockHeld(TxnId),

    #[error("transaction {0} released a table lock while still holding row locks on it")]
    TableUnlockedBeforeUnlockingRows(TxnId),

    #[error("transaction {0} requested an intention lock on a row")]
    AttemptedIntentionLockOnRow(TxnId),

    #[error("transaction {0} requested a row lock without a covering table lock")]
    TableLockNotPresent(TxnId),
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    /// Grants sit ahead of waiters; among waiters order is FIFO except that
    /// an upgrade is inserted ahead of every waiter
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading on this resource, at most one
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
        }
    }
}

/// Strict two-phase lock manager over tables and rows.
///
/// Each resource carries a FIFO request queue and a condition variable;
/// threads block inside [`LockManager::lock_table`]/[`LockManager::lock_row`]
/// until their request can be granted. A background thread rebuilds a
/// waits-for graph on every tick and aborts the youngest transaction on each
/// cycle it finds.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    detection_enabled: AtomicBool,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Self::with_config(LockManagerConfig::default())
    }

    pub fn with_config(config: LockManagerConfig) -> Arc<Self> {
        let lock_manager = Arc::new(Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            detection_enabled: AtomicBool::new(true),
        });
        Self::spawn_detector(&lock_manager, config.cycle_detection_interval);
        lock_manager
    }

    /// Turn the background deadlock detector on or off. Detection passes can
    /// still be driven manually through [`LockManager::detect_deadlocks`].
    pub fn enable_cycle_detection(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Acquire `mode` on a table, blocking until granted. Returns false if
    /// the transaction was aborted while waiting (deadlock victim).
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, LockAbortError> {
        self.check_acquisition(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock().unwrap();
            map.entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };
        self.lock_resource(&queue, txn, mode, oid, None)
    }

    /// Release a table lock. Fails if the transaction holds no grant on the
    /// table or still holds row locks underneath it.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<(), LockAbortError> {
        let queue = {
            let map = self.table_lock_map.lock().unwrap();
            match map.get(&oid) {
                Some(queue) => queue.clone(),
                None => {
                    return Err(self.abort(
                        txn,
                        LockAbortError::AttemptedUnlockButNoLockHeld(txn.id()),
                    ))
                }
            }
        };

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(
                txn,
                LockAbortError::TableUnlockedBeforeUnlockingRows(txn.id()),
            ));
        }

        self.unlock_resource(&queue, txn)
    }

    /// Acquire S or X on a row. The transaction must already hold a covering
    /// table lock. Returns false if aborted while waiting.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, LockAbortError> {
        if mode.is_intention() {
            return Err(self.abort(txn, LockAbortError::AttemptedIntentionLockOnRow(txn.id())));
        }
        self.check_acquisition(txn, mode)?;

        let covering: &[LockMode] = match mode {
            LockMode::Exclusive => &[
                LockMode::Exclusive,
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
            ],
            _ => &[
                LockMode::Shared,
                LockMode::Exclusive,
                LockMode::IntentionShared,
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
            ],
        };
        if !txn.holds_table_lock_any(oid, covering) {
            return Err(self.abort(txn, LockAbortError::TableLockNotPresent(txn.id())));
        }

        let queue = {
            let mut map = self.row_lock_map.lock().unwrap();
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };
        self.lock_resource(&queue, txn, mode, oid, Some(rid))
    }

    /// Release a row lock
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), LockAbortError> {
        let queue = {
            let map = self.row_lock_map.lock().unwrap();
            match map.get(&rid) {
                Some(queue) => queue.clone(),
                None => {
                    return Err(self.abort(
                        txn,
                        LockAbortError::AttemptedUnlockButNoLockHeld(txn.id()),
                    ))
                }
            }
        };
        self.unlock_resource(&queue, txn)
    }

    /// Run one waits-for pass: snapshot every queue, then abort the youngest
    /// transaction of each cycle and wake its queue so the victim self-reaps.
    pub fn detect_deadlocks(&self) {
        let mut edges: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        let mut wait_sites: HashMap<TxnId, (Arc<Transaction>, Arc<LockRequestQueue>)> =
            HashMap::new();

        {
            let table_map = self.table_lock_map.lock().unwrap();
            let row_map = self.row_lock_map.lock().unwrap();
            for queue in table_map.values().chain(row_map.values()) {
                let state = queue.state.lock().unwrap();
                let granted: Vec<TxnId> = state
                    .requests
                    .iter()
                    .filter(|r| r.granted)
                    .map(|r| r.txn.id())
                    .collect();
                for request in state.requests.iter().filter(|r| !r.granted) {
                    wait_sites.insert(
                        request.txn.id(),
                        (Arc::clone(&request.txn), Arc::clone(queue)),
                    );
                    for &holder in &granted {
                        edges.entry(request.txn.id()).or_default().push(holder);
                    }
                }
            }
        }

        for targets in edges.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        debug!(
            "deadlock pass over {} waiting transactions",
            wait_sites.len()
        );

        while let Some(victim) = find_cycle_victim(&edges) {
            info!("deadlock detected, aborting transaction {}", victim);
            edges.remove(&victim);
            for targets in edges.values_mut() {
                targets.retain(|&id| id != victim);
            }
            if let Some((txn, queue)) = wait_sites.get(&victim) {
                txn.set_state(TransactionState::Aborted);
                let _state = queue.state.lock().unwrap();
                queue.cv.notify_all();
            }
        }
    }

    fn spawn_detector(lock_manager: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(lock_manager);
        thread::spawn(move || loop {
            thread::sleep(interval);
            let Some(lock_manager) = weak.upgrade() else {
                break;
            };
            if lock_manager.detection_enabled.load(Ordering::SeqCst) {
                lock_manager.detect_deadlocks();
            }
        });
    }

    /// Reject acquisitions the transaction's phase or isolation level forbids
    fn check_acquisition(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), LockAbortError> {
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared
                        | LockMode::IntentionShared
                        | LockMode::SharedIntentionExclusive
                ) {
                    return Err(
                        self.abort(txn, LockAbortError::LockSharedOnReadUncommitted(txn.id()))
                    );
                }
                if shrinking {
                    return Err(self.abort(txn, LockAbortError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && !matches!(mode, LockMode::Shared | LockMode::IntentionShared) {
                    return Err(self.abort(txn, LockAbortError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, LockAbortError::LockOnShrinking(txn.id())));
                }
            }
        }
        Ok(())
    }

    /// Queue a request (or upgrade) on a resource and wait until it is
    /// granted or the transaction is aborted by the deadlock detector.
    fn lock_resource(
        &self,
        queue: &Arc<LockRequestQueue>,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<bool, LockAbortError> {
        let mut state = queue.state.lock().unwrap();

        let mut is_upgrade = false;
        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id())
        {
            // Reacquiring the held mode is a no-op.
            if state.requests[pos].mode == mode {
                return Ok(true);
            }
            // Only one transaction may upgrade on a resource at a time.
            if state.upgrading.is_some() {
                return Err(self.abort(txn, LockAbortError::UpgradeConflict(txn.id())));
            }
            if !can_upgrade(state.requests[pos].mode, mode) {
                return Err(self.abort(txn, LockAbortError::IncompatibleUpgrade(txn.id())));
            }

            // Drop the old grant and slot the upgrade ahead of every waiter.
            let old = state.requests.remove(pos);
            erase_held(txn, old.mode, old.oid, old.rid);
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn: Arc::clone(txn),
                    mode,
                    oid,
                    rid,
                    granted: false,
                },
            );
            state.upgrading = Some(txn.id());
            is_upgrade = true;
        } else {
            state.requests.push(LockRequest {
                txn: Arc::clone(txn),
                mode,
                oid,
                rid,
                granted: false,
            });
        }

        while !can_grant(&state.requests, txn.id()) {
            state = queue.cv.wait(state).unwrap();
            // The deadlock detector aborts victims in place; they wake up,
            // withdraw their request and report failure.
            if txn.state() == TransactionState::Aborted {
                if is_upgrade {
                    state.upgrading = None;
                }
                state.requests.retain(|r| r.txn.id() != txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
        }

        if is_upgrade {
            state.upgrading = None;
        }
        if let Some(request) = state
            .requests
            .iter_mut()
            .find(|r| r.txn.id() == txn.id())
        {
            request.granted = true;
        }
        record_held(txn, mode, oid, rid);

        // An exclusive grant blocks everyone else, so there is no one worth
        // waking.
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(true)
    }

    fn unlock_resource(
        &self,
        queue: &Arc<LockRequestQueue>,
        txn: &Arc<Transaction>,
    ) -> Result<(), LockAbortError> {
        let mut state = queue.state.lock().unwrap();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(
                txn,
                LockAbortError::AttemptedUnlockButNoLockHeld(txn.id()),
            ));
        };

        let request = state.requests.remove(pos);
        queue.cv.notify_all();
        drop(state);

        if shrinks_on_unlock(request.mode, txn.isolation_level())
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Shrinking);
        }
        erase_held(txn, request.mode, request.oid, request.rid);
        Ok(())
    }

    /// Mark the transaction aborted and hand back the reason
    fn abort(&self, txn: &Arc<Transaction>, error: LockAbortError) -> LockAbortError {
        txn.set_state(TransactionState::Aborted);
        error
    }
}

/// A waiter may be granted when every existing grant is compatible and no
/// older waiter sits ahead of it (upgrades jump the waiter line, never the
/// grant line).
fn can_grant(requests: &[LockRequest], txn_id: TxnId) -> bool {
    let Some(candidate) = requests.iter().find(|r| !r.granted && r.txn.id() == txn_id) else {
        return false;
    };
    for request in requests {
        if request.granted {
            if !compatible(request.mode, candidate.mode) {
                return false;
            }
        } else {
            return request.txn.id() == txn_id;
        }
    }
    false
}

fn record_held(txn: &Arc<Transaction>, mode: LockMode, oid: TableOid, rid: Option<Rid>) {
    match rid {
        Some(rid) => txn.record_row_lock(mode, oid, rid),
        None => txn.record_table_lock(mode, oid),
    }
}

fn erase_held(txn: &Arc<Transaction>, mode: LockMode, oid: TableOid, rid: Option<Rid>) {
    match rid {
        Some(rid) => txn.erase_row_lock(mode, oid, rid),
        None => txn.erase_table_lock(mode, oid),
    }
}

/// DFS over the waits-for graph; on the first cycle, return the youngest
/// (largest id) transaction on the active search path.
fn find_cycle_victim(edges: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
    fn dfs(node: TxnId, edges: &BTreeMap<TxnId, Vec<TxnId>>, active: &mut BTreeSet<TxnId>) -> bool {
        if !active.insert(node) {
            return true;
        }
        if let Some(targets) = edges.get(&node) {
            for &target in targets {
                if active.contains(&target) {
                    return true;
                }
                if dfs(target, edges, active) {
                    return true;
                }
            }
        }
        active.remove(&node);
        false
    }

    for &start in edges.keys() {
        let mut active = BTreeSet::new();
        if dfs(start, edges, &mut active) {
            return active.iter().max().copied();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix_matches_hierarchy() {
        use LockMode::*;
        let compatible_pairs = [
            (IntentionShared, IntentionShared),
            (IntentionShared, IntentionExclusive),
            (IntentionShared, Shared),
            (IntentionShared, SharedIntentionExclusive),
            (IntentionExclusive, IntentionShared),
            (IntentionExclusive, IntentionExclusive),
            (Shared, IntentionShared),
            (Shared, Shared),
            (SharedIntentionExclusive, IntentionShared),
        ];
        for held in [Shared, Exclusive, IntentionShared, IntentionExclusive, SharedIntentionExclusive] {
            for requested in [Shared, Exclusive, IntentionShared, IntentionExclusive, SharedIntentionExclusive] {
                let expected = compatible_pairs.contains(&(held, requested));
                assert_eq!(
                    compatible(held, requested),
                    expected,
                    "held {:?} requested {:?}",
                    held,
                    requested
                );
            }
        }
    }

    #[test]
    fn test_upgrade_paths() {
        use LockMode::*;
        assert!(can_upgrade(IntentionShared, Shared));
        assert!(can_upgrade(IntentionShared, Exclusive));
        assert!(can_upgrade(IntentionShared, IntentionExclusive));
        assert!(can_upgrade(IntentionShared, SharedIntentionExclusive));
        assert!(can_upgrade(Shared, Exclusive));
        assert!(can_upgrade(Shared, SharedIntentionExclusive));
        assert!(can_upgrade(IntentionExclusive, Exclusive));
        assert!(can_upgrade(IntentionExclusive, SharedIntentionExclusive));
        assert!(can_upgrade(SharedIntentionExclusive, Exclusive));

        assert!(!can_upgrade(Exclusive, Shared));
        assert!(!can_upgrade(Shared, IntentionShared));
        assert!(!can_upgrade(SharedIntentionExclusive, Shared));
    }

    #[test]
    fn test_cycle_victim_is_youngest() {
        let mut edges: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        edges.insert(1, vec![2]);
        edges.insert(2, vec![1]);
        assert_eq!(find_cycle_victim(&edges), Some(2));

        let mut edges: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        edges.insert(3, vec![4]);
        edges.insert(4, vec![5]);
        edges.insert(5, vec![3]);
        assert_eq!(find_cycle_victim(&edges), Some(5));
    }

    #[test]
    fn test_no_cycle_means_no_victim() {
        let mut edges: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        edges.insert(1, vec![2]);
        edges.insert(2, vec![3]);
        assert_eq!(find_cycle_victim(&edges), None);
        assert_eq!(find_cycle_victim(&BTreeMap::new()), None);
    }
}
