//! In-memory key-value store

use crate::error::Result;
use crate::ports::KeyValueStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory key-value store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDatabase {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let db = MemoryDatabase::new();
        assert!(db.is_empty());

        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.put(b"key1", b"value3").unwrap();

        assert_eq!(db.get(b"key1").unwrap(), Some(b"value3".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(db.get(b"key3").unwrap(), None);
        assert_eq!(db.len(), 2);
    }
}
