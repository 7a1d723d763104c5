use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::common::types::{Rid, TableOid};
use stratadb::storage::table::page::TupleMeta;
use stratadb::transaction::lock_manager::LockMode;
use stratadb::transaction::transaction::{
    IsolationLevel, TableWriteRecord, Transaction, WriteType,
};
use stratadb::{BufferPoolConfig, BufferPoolManager, LockManager, TableHeap, TransactionManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    };
    let buffer_pool = Arc::new(BufferPoolManager::new(config, path)?);
    Ok((buffer_pool, file))
}

/// A minimal transactional table fixture: one table heap plus the lock and
/// transaction managers, seeded with the rows 233 and 234.
#[allow(dead_code)]
pub struct TestDb {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub table: Arc<TableHeap>,
    pub oid: TableOid,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
    _file: NamedTempFile,
}

#[allow(dead_code)]
pub fn create_test_db() -> Result<TestDb> {
    let (buffer_pool, file) = create_test_buffer_pool(32)?;
    let table = Arc::new(TableHeap::new(buffer_pool.clone())?);
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));

    let db = TestDb {
        buffer_pool,
        table,
        oid: 1,
        lock_manager,
        txn_manager,
        _file: file,
    };

    // Seed the dataset every visibility scenario starts from
    let seeder = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    insert_row(&db, &seeder, 233)?;
    insert_row(&db, &seeder, 234)?;
    db.txn_manager.commit(&seeder);
    Ok(db)
}

/// Insert executor contract: IX on the table, X on the new row, and a write
/// record for abort.
#[allow(dead_code)]
pub fn insert_row(db: &TestDb, txn: &Arc<Transaction>, value: i64) -> Result<Rid> {
    db.lock_manager
        .lock_table(txn, LockMode::IntentionExclusive, db.oid)?;

    let meta = TupleMeta::new(txn.id());
    let rid = db.table.insert_tuple(meta, &value.to_le_bytes())?;

    db.lock_manager
        .lock_row(txn, LockMode::Exclusive, db.oid, rid)?;
    txn.append_table_write(TableWriteRecord {
        table: db.table.clone(),
        table_oid: db.oid,
        rid,
        wtype: WriteType::Insert,
    });
    Ok(rid)
}

/// Delete executor contract: IX on the table, X on the victim row, a
/// tombstone flip, and a write record for abort.
#[allow(dead_code)]
pub fn delete_row(db: &TestDb, txn: &Arc<Transaction>, value: i64) -> Result<bool> {
    db.lock_manager
        .lock_table(txn, LockMode::IntentionExclusive, db.oid)?;

    let target = db
        .table
        .iter()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .find(|(_, _, data)| decode_row(data) == value);
    let Some((rid, mut meta, _)) = target else {
        return Ok(false);
    };

    db.lock_manager
        .lock_row(txn, LockMode::Exclusive, db.oid, rid)?;

    meta.is_deleted = true;
    meta.delete_txn_id = txn.id();
    db.table.update_tuple_meta(meta, rid)?;
    txn.append_table_write(TableWriteRecord {
        table: db.table.clone(),
        table_oid: db.oid,
        rid,
        wtype: WriteType::Delete,
    });
    Ok(true)
}

/// Scan executor contract: IS on the table and S per row, except under
/// READ_UNCOMMITTED, which reads without locks (and so sees dirty rows).
/// READ_COMMITTED drops each row lock after the read.
#[allow(dead_code)]
pub fn scan_rows(db: &TestDb, txn: &Arc<Transaction>) -> Result<Vec<i64>> {
    let locking = txn.isolation_level() != IsolationLevel::ReadUncommitted;
    if locking {
        db.lock_manager
            .lock_table(txn, LockMode::IntentionShared, db.oid)?;
    }

    let mut values = Vec::new();
    for entry in db.table.iter() {
        let (rid, _, data) = entry?;
        if locking {
            db.lock_manager
                .lock_row(txn, LockMode::Shared, db.oid, rid)?;
            // Re-read under the lock: the writer may have finished while we
            // were blocked on it
            let (meta, data) = db.table.get_tuple(rid)?;
            if !meta.is_deleted {
                values.push(decode_row(&data));
            }
            if txn.isolation_level() == IsolationLevel::ReadCommitted {
                db.lock_manager.unlock_row(txn, db.oid, rid, false)?;
            }
        } else {
            values.push(decode_row(&data));
        }
    }
    values.sort_unstable();
    Ok(values)
}

#[allow(dead_code)]
pub fn decode_row(data: &[u8]) -> i64 {
    i64::from_le_bytes(data[0..8].try_into().unwrap())
}
