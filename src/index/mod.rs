pub mod btree;

use serde::{Deserialize, Serialize};

use crate::common::types::Rid;

pub use btree::{BPlusTree, BTreeError, BTreeIterator};

/// Type-erased index surface used by transaction abort processing: keys
/// travel in their encoded form so write records need not be generic over
/// the index key type.
pub trait TransactionalIndex: Send + Sync {
    fn insert_encoded(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError>;
    fn remove_encoded(&self, key: &[u8]) -> Result<(), BTreeError>;
}

/// Encode a key for an index write record.
pub fn encode_key<K: Serialize>(key: &K) -> Result<Vec<u8>, BTreeError> {
    bincode::serialize(key).map_err(|e| BTreeError::SerializationError(e.to_string()))
}

impl<K> TransactionalIndex for BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    fn insert_encoded(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError> {
        let key: K = bincode::deserialize(key)
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        self.insert(key, rid)
    }

    fn remove_encoded(&self, key: &[u8]) -> Result<(), BTreeError> {
        let key: K = bincode::deserialize(key)
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        self.remove(&key)
    }
}
