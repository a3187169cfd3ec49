//! LRU object map with spill to the persistent store

use super::broker::ObjectBroker;
use super::map::{MapStats, ObjectMap};
use super::orchestrator::CacheOrchestrator;
use crate::alloc::{BufferHandle, ChunkAllocator};
use crate::error::{Error, Result};
use crate::metrics;
use crate::CacheKey;
use lru::LruCache;
use parking_lot::Mutex;
use std::marker::PhantomData;
use tracing::{debug, warn};

const MAP_LABEL: &str = "lru";

struct ResidentEntry {
    handle: BufferHandle,
    size: usize,
}

struct LruState<K> {
    /// Least recently touched first
    entries: LruCache<K, ResidentEntry>,
    /// Sum of the encoded sizes of all resident entries
    total: usize,
    hits: u64,
    misses: u64,
    spills: u64,
    disposed: bool,
}

/// Byte-budgeted LRU map of encoded objects
///
/// Encoded objects live in buffers from a chunk allocator. When the
/// resident total exceeds the budget, or the allocator runs out of
/// chunks, the least recently touched entries are written to the store
/// and their buffers freed.
///
/// Lock order is map state, then allocator. Spill writes to the store
/// happen under the map lock.
pub struct LruObjectMap<K, B> {
    state: Mutex<LruState<K>>,
    allocator: ChunkAllocator,
    budget: usize,
    _broker: PhantomData<fn() -> B>,
}

impl<K: CacheKey, B: ObjectBroker> LruObjectMap<K, B> {
    /// Create a map that keeps at most `budget` encoded bytes resident
    pub fn new(allocator: ChunkAllocator, budget: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                total: 0,
                hits: 0,
                misses: 0,
                spills: 0,
                disposed: false,
            }),
            allocator,
            budget,
            _broker: PhantomData,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Encoded bytes currently resident
    pub fn resident_bytes(&self) -> usize {
        self.state.lock().total
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// True if `key` is resident (the store is not consulted)
    pub fn is_resident(&self, key: &K) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Resident keys, least recently touched first
    pub fn resident_keys(&self) -> Vec<K> {
        self.state
            .lock()
            .entries
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn allocator(&self) -> &ChunkAllocator {
        &self.allocator
    }

    fn ensure_live(state: &LruState<K>) -> Result<()> {
        if state.disposed {
            return Err(Error::Consistency("Map used after dispose".to_string()));
        }
        Ok(())
    }

    /// Write the least recently touched entry to the store and free it
    ///
    /// Returns false when nothing is resident. A failed store write leaves
    /// the entry resident and the accounting untouched.
    fn spill_one(
        &self,
        state: &mut LruState<K>,
        cache: &dyn CacheOrchestrator<K, B>,
    ) -> Result<bool> {
        match state.entries.peek_lru() {
            Some((key, entry)) => {
                // Copied out so the store write runs without the allocator lock
                let bytes = self.allocator.with_buffer(&entry.handle, |bytes| bytes.to_vec())?;
                if let Err(e) = cache.write_to_store(key, &bytes) {
                    warn!(key = ?key, error = %e, "Spill write failed, entry stays resident");
                    return Err(e);
                }
            }
            None => return Ok(false),
        }

        let (key, entry) = state
            .entries
            .pop_lru()
            .ok_or_else(|| Error::Consistency("Spilled entry vanished".to_string()))?;

        state.total -= entry.size;
        state.spills += 1;
        metrics::SPILLS_TOTAL.inc();
        metrics::RESIDENT_BYTES.sub(entry.size as i64);

        debug!(key = ?key, size = entry.size, total = state.total, "Spilled entry to store");
        self.allocator.free(entry.handle)?;
        Ok(true)
    }

    /// Allocate `size` bytes, spilling one entry per failed attempt
    fn allocate_with_spill(
        &self,
        state: &mut LruState<K>,
        size: usize,
        cache: &dyn CacheOrchestrator<K, B>,
    ) -> Result<BufferHandle> {
        loop {
            match self.allocator.allocate(size) {
                Ok(handle) => return Ok(handle),
                Err(Error::Allocation(reason)) => {
                    if !self.spill_one(state, cache)? {
                        return Err(Error::Allocation(reason));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn release_entry(&self, state: &mut LruState<K>, entry: ResidentEntry) -> Result<()> {
        state.total -= entry.size;
        metrics::RESIDENT_BYTES.sub(entry.size as i64);
        self.allocator.free(entry.handle)
    }
}

impl<K: CacheKey, B: ObjectBroker> ObjectMap<K, B> for LruObjectMap<K, B> {
    fn contains(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool> {
        let state = self.state.lock();
        Self::ensure_live(&state)?;
        if state.entries.contains(key) {
            return Ok(true);
        }
        drop(state);

        Ok(cache.store_contains(key))
    }

    fn get_once(
        &self,
        key: &K,
        hint: B::Hint,
        cache: &dyn CacheOrchestrator<K, B>,
    ) -> Result<Option<B::Object>> {
        let mut state = self.state.lock();
        Self::ensure_live(&state)?;

        if let Some(entry) = state.entries.pop(key) {
            state.hits += 1;
            metrics::CACHE_HITS.with_label_values(&[MAP_LABEL]).inc();

            let decoded = self
                .allocator
                .with_buffer(&entry.handle, |bytes| cache.broker().decode(bytes, hint));
            self.release_entry(&mut state, entry)?;

            debug!(key = ?key, total = state.total, "Resident hit consumed");
            return decoded?.map(Some);
        }

        state.misses += 1;
        metrics::CACHE_MISSES.with_label_values(&[MAP_LABEL]).inc();
        drop(state);

        cache.take_from_store(key, hint)
    }

    fn put(&self, key: K, obj: &B::Object, cache: &dyn CacheOrchestrator<K, B>) -> Result<()> {
        let size = cache.broker().encoded_size_of(obj)?;

        let mut state = self.state.lock();
        Self::ensure_live(&state)?;

        // Any previous value of the key stays in place until the new one
        // is allocated and encoded
        let handle = self.allocate_with_spill(&mut state, size, cache)?;

        let encoded = self
            .allocator
            .with_buffer_mut(&handle, |buf| cache.broker().encode(obj, buf))?;
        if let Err(e) = encoded {
            self.allocator.free(handle)?;
            return Err(e);
        }

        // Stored copy, possibly spilled by the allocation above
        if cache.store_contains(&key) {
            if let Err(e) = cache.remove_from_store(&key) {
                self.allocator.free(handle)?;
                return Err(e);
            }
        }

        debug!(key = ?key, size, "Put resident entry");
        let replaced = state.entries.push(key, ResidentEntry { handle, size });
        state.total += size;
        metrics::RESIDENT_BYTES.add(size as i64);

        if let Some((_, old)) = replaced {
            self.release_entry(&mut state, old)?;
        }

        while state.total > self.budget {
            if !self.spill_one(&mut state, cache)? {
                break;
            }
        }

        Ok(())
    }

    fn remove(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool> {
        let mut state = self.state.lock();
        Self::ensure_live(&state)?;

        if let Some(entry) = state.entries.pop(key) {
            self.release_entry(&mut state, entry)?;
            return Ok(true);
        }
        drop(state);

        cache.remove_from_store(key)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        metrics::RESIDENT_BYTES.sub(state.total as i64);
        state.entries.clear();
        state.total = 0;
        self.allocator.clear();
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        self.clear()?;
        self.state.lock().disposed = true;
        Ok(())
    }

    fn stats(&self) -> MapStats {
        let state = self.state.lock();
        MapStats {
            resident_entries: state.entries.len(),
            resident_bytes: state.total,
            budget: self.budget,
            hits: state.hits,
            misses: state.misses,
            spills: state.spills,
            hit_rate: MapStats::hit_rate(state.hits, state.misses),
            allocator: Some(self.allocator.stats()),
        }
    }
}
