//! Persistent stores backing the cache
//!
//! A store keeps encoded records by key. Only the cache orchestrator talks
//! to a store; object maps reach it through the orchestrator.
//!
//! ## Implementations
//!
//! - **FileCacheStore**: one scratch file, free regions reused through a
//!   coalescing free-block manager
//! - **MemoryCacheStore**: in-process map, for tests and small setups

pub mod file;
pub mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::Result;
use bytes::{Bytes, BytesMut};

/// Store-side buffer acquisition
///
/// Write-through maps encode straight into buffers obtained here instead
/// of going through a chunk allocator.
pub trait BufferSource: Send + Sync {
    /// Obtain a zeroed buffer of `size` bytes
    fn acquire(&self, size: usize) -> Result<BytesMut>;
}

/// Keyed record store
pub trait CacheStore<K>: Send + Sync {
    /// Read the record stored under `key`
    fn read(&self, key: &K) -> Result<Option<Bytes>>;

    /// Read the record under `key` and remove it in one step
    fn take(&self, key: &K) -> Result<Option<Bytes>>;

    /// Store `bytes` under `key`, replacing any previous record
    fn write(&self, key: &K, bytes: &[u8]) -> Result<()>;

    /// Remove the record under `key`; false when there was none
    fn remove(&self, key: &K) -> Result<bool>;

    fn contains(&self, key: &K) -> bool;

    /// Drop every record
    fn clear(&self) -> Result<()>;

    /// The store's own buffer source
    fn buffer_source(&self) -> &dyn BufferSource;

    fn stats(&self) -> StoreStats;
}

/// Store statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of records
    pub records: usize,
    /// Bytes held by records
    pub stored_bytes: u64,
    /// Bytes reserved by the store (file length for file stores)
    pub reserved_bytes: u64,
}
