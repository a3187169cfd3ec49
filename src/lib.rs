// tiercache - Tiered object cache
// Chunked in-memory arena with LRU spill to a persistent scratch store

#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod store;

// Re-exports for convenience
pub use alloc::{Block, BufferHandle, ChunkAllocator, FreeBlockManager};
pub use cache::{
    BytesBroker, CacheOrchestrator, CacheStats, JsonBroker, LruObjectMap, MapStats, ObjectBroker,
    ObjectCache, ObjectMap, TileBroker, TileData, TileLayout, WriteThroughObjectMap,
};
pub use config::CacheConfig;
pub use store::{BufferSource, CacheStore, FileCacheStore, MemoryCacheStore, StoreStats};

/// tiercache error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// Request the allocator cannot satisfy by construction
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        /// Backend exhausted and nothing left to spill
        #[error("Allocation error: {0}")]
        Allocation(String),

        #[error("Storage error: {0}")]
        Storage(String),

        /// Caller misuse: stale or foreign handle, use after dispose
        #[error("Consistency error: {0}")]
        Consistency(String),

        #[error("Codec error: {0}")]
        Codec(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Keys usable by the cache tiers.
pub trait CacheKey: std::hash::Hash + Eq + Clone + std::fmt::Debug + Send + Sync {}

impl<T> CacheKey for T where T: std::hash::Hash + Eq + Clone + std::fmt::Debug + Send + Sync {}
