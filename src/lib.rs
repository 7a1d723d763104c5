// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::BufferPoolConfig;
pub use index::{BPlusTree, BTreeError, BTreeIterator};
pub use storage::buffer::{BufferPoolError, BufferPoolManager, LruKReplacer};
pub use storage::disk::DiskManager;
pub use storage::page::{PageGuard, ReadPageGuard, WritePageGuard};
pub use storage::table::{TableHeap, TupleMeta};
pub use transaction::{
    DeadlockDetector, IsolationLevel, LockManager, LockMode, Transaction, TransactionManager,
};
