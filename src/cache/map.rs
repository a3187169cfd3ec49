//! Object map capability

use super::broker::ObjectBroker;
use super::orchestrator::CacheOrchestrator;
use crate::alloc::AllocatorStats;
use crate::error::Result;

/// Keyed object map placed in front of a persistent store
///
/// Every operation receives the orchestrator that owns the map; the map
/// reaches the store only through it.
pub trait ObjectMap<K, B: ObjectBroker>: Send + Sync {
    /// True if `key` is resident or in the store
    fn contains(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool>;

    /// Take the object stored under `key`
    ///
    /// The entry is consumed by the read, whether it was resident or
    /// stored. `Ok(None)` means the key is neither resident nor in the
    /// store.
    fn get_once(
        &self,
        key: &K,
        hint: B::Hint,
        cache: &dyn CacheOrchestrator<K, B>,
    ) -> Result<Option<B::Object>>;

    /// Store `obj` under `key`
    fn put(&self, key: K, obj: &B::Object, cache: &dyn CacheOrchestrator<K, B>) -> Result<()>;

    /// Drop `key` from memory or from the store; false if it was absent
    fn remove(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool>;

    /// Drop every resident entry and release memory
    fn clear(&self) -> Result<()>;

    /// Release everything; the map refuses further use
    fn dispose(&self) -> Result<()>;

    fn stats(&self) -> MapStats;
}

/// Object map statistics
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MapStats {
    pub resident_entries: usize,
    pub resident_bytes: usize,
    /// Byte budget; zero for maps that keep nothing resident
    pub budget: usize,
    pub hits: u64,
    pub misses: u64,
    pub spills: u64,
    pub hit_rate: f64,
    pub allocator: Option<AllocatorStats>,
}

impl MapStats {
    pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }
}
