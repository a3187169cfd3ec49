//! Cache orchestrator: one object map, one broker, one persistent store

use super::broker::ObjectBroker;
use super::lru_map::LruObjectMap;
use super::map::{MapStats, ObjectMap};
use super::write_through::WriteThroughObjectMap;
use crate::alloc::{BoundedBackend, ChunkAllocator, ChunkBackend, HeapBackend};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::store::{BufferSource, CacheStore, FileCacheStore, StoreStats};
use crate::CacheKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Store-facing side of a cache, as seen by its object map
///
/// The orchestrator is the only component that talks to the persistent
/// store.
pub trait CacheOrchestrator<K, B: ObjectBroker>: Send + Sync {
    /// The active broker
    fn broker(&self) -> &B;

    /// Read and decode the record under `key`
    fn read_from_store(&self, key: &K, hint: B::Hint) -> Result<Option<B::Object>>;

    /// Read, decode and remove the record under `key`
    ///
    /// A record that fails to decode is put back.
    fn take_from_store(&self, key: &K, hint: B::Hint) -> Result<Option<B::Object>>;

    /// Persist encoded bytes under `key`
    fn write_to_store(&self, key: &K, bytes: &[u8]) -> Result<()>;

    fn remove_from_store(&self, key: &K) -> Result<bool>;

    fn store_contains(&self, key: &K) -> bool;

    /// The store's own buffer acquisition primitive
    fn buffer_source(&self) -> &dyn BufferSource;
}

/// Tiered object cache
///
/// Puts and gets go through the object map; the map falls back to the
/// store (through this orchestrator) on overflow and on misses.
pub struct ObjectCache<K, B> {
    broker: B,
    map: Box<dyn ObjectMap<K, B>>,
    store: Box<dyn CacheStore<K>>,
    disposed: AtomicBool,
}

impl<K, B> ObjectCache<K, B>
where
    K: CacheKey + 'static,
    B: ObjectBroker + 'static,
{
    /// Compose a cache from its parts
    pub fn new(broker: B, map: Box<dyn ObjectMap<K, B>>, store: Box<dyn CacheStore<K>>) -> Self {
        Self {
            broker,
            map,
            store,
            disposed: AtomicBool::new(false),
        }
    }

    /// LRU cache over `store` with a heap-backed chunk allocator
    pub fn with_lru(
        broker: B,
        chunk_size: usize,
        memory_budget: usize,
        store: Box<dyn CacheStore<K>>,
    ) -> Self {
        let map = LruObjectMap::new(ChunkAllocator::new(chunk_size), memory_budget);
        Self::new(broker, Box::new(map), store)
    }

    /// Cache that keeps nothing resident
    pub fn write_through(broker: B, store: Box<dyn CacheStore<K>>) -> Self {
        Self::new(broker, Box::new(WriteThroughObjectMap::new()), store)
    }

    /// Build a cache over a scratch file store from configuration
    ///
    /// Budgets below `write_through_threshold` select the write-through
    /// map; anything larger gets an LRU map with its own chunk allocator.
    pub fn from_config(broker: B, config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let store = FileCacheStore::create_in(config.scratch_dir(), config.store_capacity)?;

        let map: Box<dyn ObjectMap<K, B>> = if config.uses_write_through() {
            Box::new(WriteThroughObjectMap::new())
        } else {
            let backend: Arc<dyn ChunkBackend> = match config.max_chunks {
                Some(max_chunks) => Arc::new(BoundedBackend::new(max_chunks)),
                None => Arc::new(HeapBackend),
            };
            let allocator = ChunkAllocator::with_backend(config.chunk_size, backend);
            Box::new(LruObjectMap::new(allocator, config.memory_budget))
        };

        info!(
            write_through = config.uses_write_through(),
            memory_budget = config.memory_budget,
            chunk_size = config.chunk_size,
            store = ?store.path(),
            "Built object cache"
        );

        Ok(Self::new(broker, map, Box::new(store)))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Consistency("Cache used after dispose".to_string()));
        }
        Ok(())
    }

    /// True if `key` is resident or stored
    pub fn contains(&self, key: &K) -> Result<bool> {
        self.ensure_live()?;
        self.map.contains(key, self)
    }

    /// Take the object under `key` (resident entries are consumed)
    pub fn get_once(&self, key: &K, hint: B::Hint) -> Result<Option<B::Object>> {
        self.ensure_live()?;
        self.map.get_once(key, hint, self)
    }

    pub fn put(&self, key: K, obj: &B::Object) -> Result<()> {
        self.ensure_live()?;
        self.map.put(key, obj, self)
    }

    pub fn remove(&self, key: &K) -> Result<bool> {
        self.ensure_live()?;
        self.map.remove(key, self)
    }

    /// Drop every entry from memory and from the store
    pub fn clear(&self) -> Result<()> {
        self.ensure_live()?;
        self.map.clear()?;
        self.store.clear()
    }

    /// Release memory and store contents; later calls fail
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.map.dispose()?;
        self.store.clear()?;
        info!("Disposed object cache");
        Ok(())
    }

    /// Get cache statistics for both tiers
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            map: self.map.stats(),
            store: self.store.stats(),
        }
    }
}

impl<K, B> CacheOrchestrator<K, B> for ObjectCache<K, B>
where
    K: CacheKey + 'static,
    B: ObjectBroker + 'static,
{
    fn broker(&self) -> &B {
        &self.broker
    }

    fn read_from_store(&self, key: &K, hint: B::Hint) -> Result<Option<B::Object>> {
        match self.store.read(key)? {
            Some(bytes) => self.broker.decode(&bytes, hint).map(Some),
            None => Ok(None),
        }
    }

    fn take_from_store(&self, key: &K, hint: B::Hint) -> Result<Option<B::Object>> {
        let bytes = match self.store.take(key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match self.broker.decode(&bytes, hint) {
            Ok(obj) => Ok(Some(obj)),
            Err(e) => {
                if let Err(restore) = self.store.write(key, &bytes) {
                    warn!(key = ?key, error = %restore, "Failed to restore undecodable record");
                }
                Err(e)
            }
        }
    }

    fn write_to_store(&self, key: &K, bytes: &[u8]) -> Result<()> {
        self.store.write(key, bytes)
    }

    fn remove_from_store(&self, key: &K) -> Result<bool> {
        self.store.remove(key)
    }

    fn store_contains(&self, key: &K) -> bool {
        self.store.contains(key)
    }

    fn buffer_source(&self) -> &dyn BufferSource {
        self.store.buffer_source()
    }
}

/// Statistics of both cache tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub map: MapStats,
    pub store: StoreStats,
}
