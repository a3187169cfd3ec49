//! Chunk Allocator
//!
//! Sub-allocates cache payload buffers out of large fixed-size chunks.
//! Each chunk is paired with a coalescing free-block manager for its
//! whole lifetime.
//!
//! # Architecture
//!
//! ```text
//! ChunkAllocator (most recently added first)
//!   ├─→ Chunk#2 (16 MiB) → Free: [0, 4096) [9000, 16 MiB)
//!   ├─→ Chunk#1 (16 MiB) → Free: [12288, 16 MiB)
//!   └─→ Chunk#0 (16 MiB) → Free: []
//!
//! Live allocations
//!   └─→ (chunk#1, 0)    → Block[0, 12288)
//!   └─→ (chunk#2, 4096) → Block[4096, 9000)
//! ```
//!
//! Allocation is first-fit in ascending position order within a chunk,
//! and a new chunk is only requested from the backend when no existing
//! chunk has a fitting free block.

pub mod allocator;
pub mod block;
pub mod chunk;
pub mod free_block;

#[cfg(test)]
mod proptest;

pub use allocator::{AllocatorStats, BufferHandle, ChunkAllocator};
pub use block::Block;
pub use chunk::{BoundedBackend, Chunk, ChunkBackend, ChunkId, HeapBackend};
pub use free_block::FreeBlockManager;
