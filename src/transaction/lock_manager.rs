use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::transaction::deadlock::WaitsForGraph;

/// The five hierarchical lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The standard compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => other != Exclusive,
            IntentionExclusive => matches!(other, IntentionShared | IntentionExclusive),
            Shared => matches!(other, IntentionShared | Shared),
            SharedIntentionExclusive => other == IntentionShared,
            Exclusive => false,
        }
    }

    /// The upgrade matrix: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> {X}.
    pub fn can_upgrade_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => requested != IntentionShared,
            Shared | IntentionExclusive => {
                matches!(requested, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }

    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        )
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::SharedIntentionExclusive => "SIX",
            LockMode::Exclusive => "X",
        };
        write!(f, "{name}")
    }
}

/// Why a transaction was aborted by the lock manager.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while in the shrinking phase")]
    LockOnShrinking,

    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,

    #[error("upgrade not permitted by the upgrade matrix")]
    IncompatibleUpgrade,

    #[error("another transaction is already upgrading on this resource")]
    UpgradeConflict,

    #[error("row lock requested without a qualifying table lock")]
    TableLockNotPresent,

    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,

    #[error("no lock held on the resource being unlocked")]
    AttemptedUnlockButNoLockHeld,

    #[error("table unlocked while row locks are still held")]
    TableUnlockedBeforeUnlockingRows,
}

/// A fatal transactional error: the transaction has been moved to ABORTED.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueInner {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
}

/// FIFO request queue for one lockable resource.
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// The hierarchical lock manager: table- and row-level FIFO queues with
/// upgrade priority, validated against the transaction's isolation level
/// and two-phase state.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<(TableOid, Rid), Arc<LockRequestQueue>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a table lock, blocking until granted. Returns false when the
    /// lock was already held in this mode, or when the wait was cut short by
    /// the transaction being aborted (or committed) externally.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        debug!("txn {} requests {} on table {}", txn.id(), mode, oid);
        self.can_txn_take_lock(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let held = txn.table_lock_mode(oid);
        if held == Some(mode) {
            return Ok(false);
        }
        if let Some(held) = held {
            if !held.can_upgrade_to(mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let mut inner = queue.inner.lock();
        if let Some(position) = inner.requests.iter().position(|r| r.txn_id == txn.id()) {
            // Upgrade: replace the old grant with a request holding priority
            // over every plain waiter
            if inner.upgrading.is_some() {
                drop(inner);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            let old = inner.requests.remove(position).expect("position is in range");
            debug_assert!(old.granted);
            txn.remove_table_lock(old.mode, oid);
            inner.upgrading = Some(txn.id());

            let insert_at = inner
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(inner.requests.len());
            inner.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            inner.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        if !self.wait_for_grant(txn, &queue, &mut inner) {
            return Ok(false);
        }
        drop(inner);

        txn.insert_table_lock(mode, oid);
        debug!("txn {} granted {} on table {}", txn.id(), mode, oid);
        Ok(true)
    }

    /// Release a table lock, applying the isolation-dependent phase
    /// transition. All row locks on the table must be gone first.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionAbort> {
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }
        let Some(held) = txn.table_lock_mode(oid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        self.transition_on_unlock(txn, held);

        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&oid).cloned()
        };
        if let Some(queue) = queue {
            let mut inner = queue.inner.lock();
            inner.requests.retain(|r| r.txn_id != txn.id());
            self.grant_locked(&mut inner);
            queue.cv.notify_all();
        }

        txn.remove_table_lock(held, oid);
        debug!("txn {} released {} on table {}", txn.id(), held, oid);
        Ok(true)
    }

    /// Acquire a row lock. Only S and X are legal on rows, and the owning
    /// table must already be locked in a qualifying mode.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        debug!("txn {} requests {} on row {}:{}", txn.id(), mode, oid, rid);
        let held = txn.row_lock_mode(oid, rid);
        if held == Some(mode) || held == Some(LockMode::Exclusive) {
            return Ok(false);
        }

        self.check_appropriate_lock_on_table(txn, oid, mode)?;
        self.can_txn_take_lock(txn, mode)?;

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry((oid, rid))
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let mut inner = queue.inner.lock();
        if let Some(position) = inner.requests.iter().position(|r| r.txn_id == txn.id()) {
            if inner.upgrading.is_some() {
                drop(inner);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            let old = inner.requests.remove(position).expect("position is in range");
            debug_assert!(old.granted);
            txn.remove_row_lock(old.mode, oid, rid);
            inner.upgrading = Some(txn.id());

            let insert_at = inner
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(inner.requests.len());
            inner.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            inner.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        if !self.wait_for_grant(txn, &queue, &mut inner) {
            return Ok(false);
        }
        drop(inner);

        txn.insert_row_lock(mode, oid, rid);
        debug!("txn {} granted {} on row {}:{}", txn.id(), mode, oid, rid);
        Ok(true)
    }

    /// Release a row lock. `force` skips the phase transition; it is used
    /// when commit/abort processing tears down all locks at once.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionAbort> {
        let Some(held) = txn.row_lock_mode(oid, rid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        if !force {
            match txn.isolation_level() {
                IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => {
                    if held == LockMode::Exclusive {
                        txn.transition_to_shrinking();
                    }
                }
                IsolationLevel::RepeatableRead => txn.transition_to_shrinking(),
            }
        }

        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&(oid, rid)).cloned()
        };
        if let Some(queue) = queue {
            let mut inner = queue.inner.lock();
            inner.requests.retain(|r| r.txn_id != txn.id());
            self.grant_locked(&mut inner);
            queue.cv.notify_all();
        }

        txn.remove_row_lock(held, oid, rid);
        Ok(true)
    }

    /// Tear down every lock the transaction still holds, without phase
    /// transitions. Used by commit and abort.
    pub fn release_all(&self, txn: &Transaction) {
        for (oid, rid, _mode) in txn.held_row_locks() {
            let queue = {
                let map = self.row_lock_map.lock();
                map.get(&(oid, rid)).cloned()
            };
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn.id());
                self.grant_locked(&mut inner);
                queue.cv.notify_all();
            }
        }
        for (oid, _mode) in txn.held_table_locks() {
            let queue = {
                let map = self.table_lock_map.lock();
                map.get(&oid).cloned()
            };
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn.id());
                self.grant_locked(&mut inner);
                queue.cv.notify_all();
            }
        }
        txn.clear_lock_sets();
        debug!("txn {} released all locks", txn.id());
    }

    /// Block until this transaction's request is granted. Returns false if
    /// the wait ended because the transaction was aborted or committed
    /// externally; the request is removed and other waiters are woken.
    fn wait_for_grant(
        &self,
        txn: &Transaction,
        queue: &LockRequestQueue,
        inner: &mut parking_lot::MutexGuard<'_, QueueInner>,
    ) -> bool {
        loop {
            let state = txn.state();
            if state == TransactionState::Aborted || state == TransactionState::Committed {
                inner.requests.retain(|r| r.txn_id != txn.id());
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                self.grant_locked(inner);
                queue.cv.notify_all();
                debug!("txn {} wait cancelled by state {:?}", txn.id(), state);
                return false;
            }

            if self.grant_locked(inner) {
                queue.cv.notify_all();
            }
            let granted = inner
                .requests
                .iter()
                .find(|r| r.txn_id == txn.id())
                .map(|r| r.granted)
                .unwrap_or(false);
            if granted {
                return true;
            }

            queue.cv.wait(inner);
        }
    }

    /// Walk the queue in FIFO order granting every pending request whose
    /// mode is compatible with all grants so far; stop at the first that is
    /// not. Clears the upgrading slot when the upgrader is granted.
    /// Returns whether anything changed.
    fn grant_locked(&self, inner: &mut QueueInner) -> bool {
        let mut granted_modes: Vec<LockMode> = inner
            .requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.mode)
            .collect();

        let mut changed = false;
        let upgrading = inner.upgrading;
        for request in inner.requests.iter_mut() {
            if request.granted {
                continue;
            }
            if !granted_modes.iter().all(|&g| request.mode.compatible_with(g)) {
                break;
            }
            request.granted = true;
            changed = true;
            granted_modes.push(request.mode);
            if upgrading == Some(request.txn_id) {
                inner.upgrading = None;
            }
        }
        changed
    }

    /// Validate the request against the transaction's phase and isolation
    /// level before it may enter a queue.
    fn can_txn_take_lock(&self, txn: &Transaction, mode: LockMode) -> Result<(), TransactionAbort> {
        let state = txn.state();
        assert!(
            state != TransactionState::Committed && state != TransactionState::Aborted,
            "lock request on a finished transaction"
        );

        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
                ) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Row locks must be S or X, and the table must carry a qualifying lock:
    /// X rows need table X/IX/SIX, S rows need any table lock.
    fn check_appropriate_lock_on_table(
        &self,
        txn: &Transaction,
        oid: TableOid,
        row_mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        if row_mode.is_intention() {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        match row_mode {
            LockMode::Exclusive => {
                if !matches!(
                    txn.table_lock_mode(oid),
                    Some(LockMode::Exclusive)
                        | Some(LockMode::IntentionExclusive)
                        | Some(LockMode::SharedIntentionExclusive)
                ) {
                    return Err(self.abort(txn, AbortReason::TableLockNotPresent));
                }
            }
            LockMode::Shared => {
                if txn.table_lock_mode(oid).is_none() {
                    return Err(self.abort(txn, AbortReason::TableLockNotPresent));
                }
            }
            _ => unreachable!("intention modes rejected above"),
        }
        Ok(())
    }

    fn transition_on_unlock(&self, txn: &Transaction, held: LockMode) {
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                debug_assert!(
                    !matches!(held, LockMode::Shared | LockMode::IntentionShared),
                    "READ_UNCOMMITTED cannot hold shared locks"
                );
                if held == LockMode::Exclusive {
                    txn.transition_to_shrinking();
                }
            }
            IsolationLevel::ReadCommitted => {
                if held == LockMode::Exclusive {
                    txn.transition_to_shrinking();
                }
            }
            IsolationLevel::RepeatableRead => {
                if matches!(held, LockMode::Exclusive | LockMode::Shared) {
                    txn.transition_to_shrinking();
                }
            }
        }
    }

    fn abort(&self, txn: &Transaction, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {}", txn.id(), reason);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Rebuild the waits-for graph from every queue: one edge from each
    /// pending request to each granted request on the same resource. The
    /// two top-level maps and each queue mutex are taken in a fixed order.
    pub fn build_waits_for(&self) -> WaitsForGraph {
        let mut graph = WaitsForGraph::new();
        {
            let map = self.table_lock_map.lock();
            for queue in map.values() {
                let inner = queue.inner.lock();
                Self::add_queue_edges(&mut graph, &inner);
            }
        }
        {
            let map = self.row_lock_map.lock();
            for queue in map.values() {
                let inner = queue.inner.lock();
                Self::add_queue_edges(&mut graph, &inner);
            }
        }
        graph
    }

    fn add_queue_edges(graph: &mut WaitsForGraph, inner: &QueueInner) {
        for pending in inner.requests.iter().filter(|r| !r.granted) {
            for granted in inner.requests.iter().filter(|r| r.granted) {
                graph.add_edge(pending.txn_id, granted.txn_id);
            }
        }
    }

    /// Wake every waiter on every queue so that freshly aborted victims can
    /// unwind.
    pub fn broadcast_all(&self) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let map = self.table_lock_map.lock();
            map.values().cloned().collect()
        };
        for queue in queues {
            queue.cv.notify_all();
        }
        let queues: Vec<Arc<LockRequestQueue>> = {
            let map = self.row_lock_map.lock();
            map.values().cloned().collect()
        };
        for queue in queues {
            queue.cv.notify_all();
        }
    }
}
