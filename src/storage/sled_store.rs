use crate::error::{BlockchainError, Result};
use crate::storage::{KeyValueStore, WriteBatch, WriteOp};
use log::debug;
use sled::Db;
use std::path::Path;

/// Sled-backed store. Batches are applied with `apply_batch`, which sled
/// commits atomically, and flushed before returning.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SledStore> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Storage(format!(
                "Failed to open database at {}: {e}",
                path.display()
            ))
        })?;
        debug!("Opened sled database at {}", path.display());
        Ok(SledStore { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => sled_batch.insert(key.as_slice(), value.as_slice()),
                WriteOp::Delete { key } => sled_batch.remove(key.as_slice()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_batch_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv");

        {
            let store = SledStore::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"lh".to_vec(), b"tip".to_vec());
            batch.put(b"utxo-1".to_vec(), b"a".to_vec());
            batch.delete(b"utxo-1".to_vec());
            store.write_batch(batch).unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get(b"lh").unwrap(), Some(b"tip".to_vec()));
        assert_eq!(store.get(b"utxo-1").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_is_ordered() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("kv")).unwrap();
        store.put(b"utxo-b", b"2").unwrap();
        store.put(b"utxo-a", b"1").unwrap();
        store.put(b"lh", b"x").unwrap();

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(b"utxo-")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"utxo-a".to_vec(), b"utxo-b".to_vec()]);
    }
}
