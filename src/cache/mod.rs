//! Object cache tiers
//!
//! Objects are put and taken by key through an object map sitting in
//! front of a persistent store.
//!
//! # Architecture
//!
//! ```text
//! ObjectCache (orchestrator)
//!   ├─→ ObjectBroker: size / encode / decode
//!   ├─→ ObjectMap
//!   │     ├─→ LruObjectMap: encoded buffers in a ChunkAllocator,
//!   │     │                 least recently touched spilled on overflow
//!   │     └─→ WriteThroughObjectMap: straight to the store
//!   └─→ CacheStore (file or memory)
//! ```
//!
//! Reads are get-once: taking a resident entry removes it from memory.

pub mod broker;
pub mod lru_map;
pub mod map;
pub mod orchestrator;
pub mod tile;
pub mod write_through;

pub use broker::{BytesBroker, JsonBroker, ObjectBroker};
pub use lru_map::LruObjectMap;
pub use map::{MapStats, ObjectMap};
pub use orchestrator::{CacheOrchestrator, CacheStats, ObjectCache};
pub use tile::{SampleFormat, TileBroker, TileData, TileLayout};
pub use write_through::WriteThroughObjectMap;
