use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::TxnId;
use crate::index::BTreeError;
use crate::storage::table::TableHeapError;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionState, WriteType,
};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {0} not found")]
    NotFound(TxnId),

    #[error("table heap error during abort: {0}")]
    TableHeapError(#[from] TableHeapError),

    #[error("index error during abort: {0}")]
    IndexError(#[from] BTreeError),
}

/// Creates and tracks transactions, and owns commit/abort processing.
/// Abort walks each write set newest-first: inserted tuples are tombstoned,
/// deleted tuples are un-tombstoned, and index entries are reversed.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a transaction in the GROWING phase.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        debug!("begin txn {} at {:?}", txn_id, isolation_level);
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Release every lock and mark the transaction COMMITTED.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());
    }

    /// Reverse the transaction's effects, release its locks, and mark it
    /// ABORTED. Reversal runs newest-first so later writes unwind before
    /// the writes they depended on.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        let (table_writes, index_writes) = txn.take_write_sets();

        for record in table_writes.into_iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    let mut meta = record.table.tuple_meta(record.rid)?;
                    meta.is_deleted = true;
                    meta.delete_txn_id = txn.id();
                    record.table.update_tuple_meta(meta, record.rid)?;
                }
                WriteType::Delete => {
                    let mut meta = record.table.tuple_meta(record.rid)?;
                    meta.is_deleted = false;
                    record.table.update_tuple_meta(meta, record.rid)?;
                }
            }
        }

        for record in index_writes.into_iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    record.index.remove_encoded(&record.key)?;
                }
                WriteType::Delete => {
                    record.index.insert_encoded(&record.key, record.rid)?;
                }
            }
        }

        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());
        Ok(())
    }
}
