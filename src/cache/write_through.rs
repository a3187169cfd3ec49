//! Object map that keeps nothing resident

use super::broker::ObjectBroker;
use super::map::{MapStats, ObjectMap};
use super::orchestrator::CacheOrchestrator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::CacheKey;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

const MAP_LABEL: &str = "write_through";

/// Map whose every put and get goes straight to the store
///
/// Encoding buffers come from the store's own buffer source, never from
/// a chunk allocator. A read takes the record out of the store.
pub struct WriteThroughObjectMap<K, B> {
    hits: AtomicU64,
    misses: AtomicU64,
    disposed: AtomicBool,
    _marker: PhantomData<fn() -> (K, B)>,
}

impl<K, B> WriteThroughObjectMap<K, B> {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Consistency("Map used after dispose".to_string()));
        }
        Ok(())
    }
}

impl<K, B> Default for WriteThroughObjectMap<K, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, B: ObjectBroker> ObjectMap<K, B> for WriteThroughObjectMap<K, B> {
    fn contains(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool> {
        self.ensure_live()?;
        Ok(cache.store_contains(key))
    }

    fn get_once(
        &self,
        key: &K,
        hint: B::Hint,
        cache: &dyn CacheOrchestrator<K, B>,
    ) -> Result<Option<B::Object>> {
        self.ensure_live()?;

        let found = cache.take_from_store(key, hint)?;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_HITS.with_label_values(&[MAP_LABEL]).inc();
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_MISSES.with_label_values(&[MAP_LABEL]).inc();
        }
        Ok(found)
    }

    fn put(&self, key: K, obj: &B::Object, cache: &dyn CacheOrchestrator<K, B>) -> Result<()> {
        self.ensure_live()?;

        let size = cache.broker().encoded_size_of(obj)?;
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "Object under {:?} encodes to zero bytes",
                key
            )));
        }

        let mut buf = cache.buffer_source().acquire(size)?;
        cache.broker().encode(obj, &mut buf[..])?;
        cache.write_to_store(&key, &buf)?;

        debug!(key = ?key, size, "Wrote entry through to store");
        Ok(())
    }

    fn remove(&self, key: &K, cache: &dyn CacheOrchestrator<K, B>) -> Result<bool> {
        self.ensure_live()?;
        cache.remove_from_store(key)
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> MapStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MapStats {
            hits,
            misses,
            hit_rate: MapStats::hit_rate(hits, misses),
            ..MapStats::default()
        }
    }
}
