use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::index::TransactionalIndex;
use crate::storage::table::TableHeap;
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// The two-phase-locking state machine. GROWING until the first qualifying
/// unlock, SHRINKING afterwards; COMMITTED and ABORTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// What a write did, for abort reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
}

/// One reversible table mutation.
pub struct TableWriteRecord {
    pub table: Arc<TableHeap>,
    pub table_oid: TableOid,
    pub rid: Rid,
    pub wtype: WriteType,
}

/// One reversible index mutation. The key is kept in its encoded form so
/// the record is not generic over the index key type.
pub struct IndexWriteRecord {
    pub index: Arc<dyn TransactionalIndex>,
    pub key: Vec<u8>,
    pub rid: Rid,
    pub wtype: WriteType,
}

#[derive(Default)]
struct LockSets {
    table_locks: HashMap<LockMode, HashSet<TableOid>>,
    shared_row_locks: HashMap<TableOid, HashSet<Rid>>,
    exclusive_row_locks: HashMap<TableOid, HashSet<Rid>>,
}

#[derive(Default)]
struct WriteSets {
    table_writes: Vec<TableWriteRecord>,
    index_writes: Vec<IndexWriteRecord>,
}

/// An active transaction: identity, isolation level, 2PL state, the locks
/// it holds, and the append-only write sets abort processing unwinds.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    lock_sets: Mutex<LockSets>,
    write_sets: Mutex<WriteSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
            write_sets: Mutex::new(WriteSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    /// Set the state outright; the deadlock detector uses this to abort a
    /// victim from another thread.
    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// First qualifying unlock: GROWING becomes SHRINKING. Terminal states
    /// are never overwritten.
    pub(crate) fn transition_to_shrinking(&self) {
        let mut state = self.state.write();
        if *state == TransactionState::Growing {
            *state = TransactionState::Shrinking;
        }
    }

    // ---- lock bookkeeping (driven by the lock manager) ----

    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        sets.table_locks
            .iter()
            .find(|(_, oids)| oids.contains(&oid))
            .map(|(&mode, _)| mode)
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        if sets
            .exclusive_row_locks
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
        {
            return Some(LockMode::Exclusive);
        }
        if sets
            .shared_row_locks
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
        {
            return Some(LockMode::Shared);
        }
        None
    }

    pub(crate) fn insert_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.lock_sets
            .lock()
            .table_locks
            .entry(mode)
            .or_default()
            .insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        if let Some(oids) = self.lock_sets.lock().table_locks.get_mut(&mode) {
            oids.remove(&oid);
        }
    }

    pub(crate) fn insert_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = self.lock_sets.lock();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_row_locks,
            LockMode::Exclusive => &mut sets.exclusive_row_locks,
            _ => unreachable!("row locks are S or X"),
        };
        map.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = self.lock_sets.lock();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_row_locks,
            LockMode::Exclusive => &mut sets.exclusive_row_locks,
            _ => unreachable!("row locks are S or X"),
        };
        if let Some(rids) = map.get_mut(&oid) {
            rids.remove(&rid);
        }
    }

    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_row_locks
            .get(&oid)
            .is_some_and(|rids| !rids.is_empty())
            || sets
                .exclusive_row_locks
                .get(&oid)
                .is_some_and(|rids| !rids.is_empty())
    }

    /// Snapshot of held row locks, for bulk release.
    pub(crate) fn held_row_locks(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let sets = self.lock_sets.lock();
        let mut locks = Vec::new();
        for (&oid, rids) in &sets.shared_row_locks {
            locks.extend(rids.iter().map(|&rid| (oid, rid, LockMode::Shared)));
        }
        for (&oid, rids) in &sets.exclusive_row_locks {
            locks.extend(rids.iter().map(|&rid| (oid, rid, LockMode::Exclusive)));
        }
        locks
    }

    /// Snapshot of held table locks, for bulk release.
    pub(crate) fn held_table_locks(&self) -> Vec<(TableOid, LockMode)> {
        let sets = self.lock_sets.lock();
        sets.table_locks
            .iter()
            .flat_map(|(&mode, oids)| oids.iter().map(move |&oid| (oid, mode)))
            .collect()
    }

    pub(crate) fn clear_lock_sets(&self) {
        let mut sets = self.lock_sets.lock();
        sets.table_locks.clear();
        sets.shared_row_locks.clear();
        sets.exclusive_row_locks.clear();
    }

    // ---- write sets (driven by executors, unwound by abort) ----

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.write_sets.lock().table_writes.push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.write_sets.lock().index_writes.push(record);
    }

    pub(crate) fn take_write_sets(&self) -> (Vec<TableWriteRecord>, Vec<IndexWriteRecord>) {
        let mut sets = self.write_sets.lock();
        (
            std::mem::take(&mut sets.table_writes),
            std::mem::take(&mut sets.index_writes),
        )
    }
}
