use crate::error::{BlockchainError, Result};
use crate::storage::{KeyValueStore, WriteBatch, WriteOp};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-process store, handy for tests and for embedding the ledger without a
/// database directory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.inner
            .read()
            .map_err(|_| BlockchainError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.inner
            .write()
            .map_err(|_| BlockchainError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.read()?;
        Ok(guard
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => {
                    guard.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    guard.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_prefix_stops_at_prefix_boundary() {
        let store = MemoryStore::new();
        store.put(b"utxo-1", b"a").unwrap();
        store.put(b"utxo-2", b"b").unwrap();
        store.put(b"utxp", b"c").unwrap();
        store.put(b"lh", b"d").unwrap();

        let entries = store.scan_prefix(b"utxo-").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, b"utxo-1".to_vec());
    }

    #[test]
    fn test_write_batch_applies_in_order() {
        let store = MemoryStore::new();
        store.put(b"k", b"old").unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"new".to_vec());
        batch.put(b"other".to_vec(), b"1".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
        assert!(store.contains_key(b"other").unwrap());
        assert_eq!(store.len().unwrap(), 2);
    }
}
