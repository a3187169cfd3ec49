//! In-memory store
//!
//! Keeps records in a hash map. Useful for tests and for setups without
//! a scratch disk.

use super::{BufferSource, CacheStore, StoreStats};
use crate::error::{Error, Result};
use crate::CacheKey;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory record store
pub struct MemoryCacheStore<K> {
    records: RwLock<HashMap<K, Bytes>>,
    capacity: Option<u64>,
}

impl<K: CacheKey> MemoryCacheStore<K> {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Create a store refusing records once `capacity` bytes are held
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Get the number of records stored
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Keys currently stored, in no particular order
    pub fn keys(&self) -> Vec<K> {
        self.records.read().keys().cloned().collect()
    }

    fn stored_bytes(records: &HashMap<K, Bytes>) -> u64 {
        records.values().map(|bytes| bytes.len() as u64).sum()
    }
}

impl<K: CacheKey> Default for MemoryCacheStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey> BufferSource for MemoryCacheStore<K> {
    fn acquire(&self, size: usize) -> Result<BytesMut> {
        if let Some(capacity) = self.capacity {
            if size as u64 > capacity {
                return Err(Error::Allocation(format!(
                    "Record of {} bytes exceeds store capacity {}",
                    size, capacity
                )));
            }
        }
        Ok(BytesMut::zeroed(size))
    }
}

impl<K: CacheKey> CacheStore<K> for MemoryCacheStore<K> {
    fn read(&self, key: &K) -> Result<Option<Bytes>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn take(&self, key: &K) -> Result<Option<Bytes>> {
        Ok(self.records.write().remove(key))
    }

    fn write(&self, key: &K, bytes: &[u8]) -> Result<()> {
        let mut records = self.records.write();

        if let Some(capacity) = self.capacity {
            let replaced = records.get(key).map_or(0, |old| old.len() as u64);
            let after = Self::stored_bytes(&records) - replaced + bytes.len() as u64;
            if after > capacity {
                return Err(Error::Allocation(format!(
                    "Store capacity {} exceeded ({} bytes needed)",
                    capacity, after
                )));
            }
        }

        records.insert(key.clone(), Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    fn contains(&self, key: &K) -> bool {
        self.records.read().contains_key(key)
    }

    fn clear(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }

    fn buffer_source(&self) -> &dyn BufferSource {
        self
    }

    fn stats(&self) -> StoreStats {
        let records = self.records.read();
        let stored_bytes = Self::stored_bytes(&records);
        StoreStats {
            records: records.len(),
            stored_bytes,
            reserved_bytes: stored_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() -> Result<()> {
        let store = MemoryCacheStore::new();

        store.write(&"a", b"alpha")?;
        store.write(&"b", b"beta")?;

        assert_eq!(store.read(&"a")?.as_deref(), Some(&b"alpha"[..]));
        assert!(store.contains(&"b"));
        assert!(store.read(&"c")?.is_none());
        assert_eq!(store.len(), 2);

        assert!(store.remove(&"a")?);
        assert!(!store.remove(&"a")?);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_memory_store_overwrite() -> Result<()> {
        let store = MemoryCacheStore::new();
        store.write(&1u32, b"old")?;
        store.write(&1u32, b"newer")?;

        assert_eq!(store.read(&1)?.as_deref(), Some(&b"newer"[..]));
        assert_eq!(store.stats().stored_bytes, 5);
        Ok(())
    }

    #[test]
    fn test_memory_store_capacity() -> Result<()> {
        let store = MemoryCacheStore::with_capacity(8);
        store.write(&"a", b"12345")?;

        let err = store.write(&"b", b"12345").unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));

        // Replacing a record only counts the difference
        store.write(&"a", b"12345678")?;

        assert!(store.buffer_source().acquire(9).is_err());
        assert_eq!(store.buffer_source().acquire(8)?.len(), 8);
        Ok(())
    }

    #[test]
    fn test_memory_store_take() -> Result<()> {
        let store = MemoryCacheStore::new();
        store.write(&"a", b"alpha")?;

        assert_eq!(store.take(&"a")?.as_deref(), Some(&b"alpha"[..]));
        assert!(store.take(&"a")?.is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_memory_store_clear() -> Result<()> {
        let store = MemoryCacheStore::new();
        store.write(&"a", b"alpha")?;
        store.clear()?;
        assert!(store.is_empty());
        Ok(())
    }
}
