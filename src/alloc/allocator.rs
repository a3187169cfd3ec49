//! Chunk allocator implementation

use super::block::Block;
use super::chunk::{Chunk, ChunkBackend, ChunkId, HeapBackend};
use super::free_block::FreeBlockManager;
use crate::error::{Error, Result};
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// View of a buffer carved out of a chunk
///
/// Handles are move-only: `ChunkAllocator::free` consumes them. The bytes
/// are reached through `with_buffer` / `with_buffer_mut`, which reject a
/// handle that was already freed or belongs to another allocator.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    allocator: u64,
    chunk: ChunkId,
    position: usize,
    len: usize,
    serial: u64,
}

impl BufferHandle {
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk
    }

    /// Offset of the buffer inside its chunk
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn identity(&self) -> (ChunkId, usize) {
        (self.chunk, self.position)
    }
}

struct ChunkSlot {
    chunk: Chunk,
    free: FreeBlockManager,
}

struct LiveAllocation {
    block: Block,
    serial: u64,
}

struct AllocatorState {
    /// Ascending chunk id; searched newest first
    chunks: Vec<ChunkSlot>,
    /// Handle identity → reserved block
    live: HashMap<(ChunkId, usize), LiveAllocation>,
    next_chunk: u64,
    next_serial: u64,
}

impl AllocatorState {
    fn slot_index(&self, id: ChunkId) -> Option<usize> {
        self.chunks
            .binary_search_by_key(&id, |slot| slot.chunk.id())
            .ok()
    }
}

/// Allocator handing out buffers from fixed-size chunks
///
/// All state sits behind one lock taken inside each call; callers never
/// hold it across calls.
pub struct ChunkAllocator {
    id: u64,
    chunk_size: usize,
    backend: Arc<dyn ChunkBackend>,
    state: Mutex<AllocatorState>,
}

impl ChunkAllocator {
    /// Create an allocator backed by the process heap
    pub fn new(chunk_size: usize) -> Self {
        Self::with_backend(chunk_size, Arc::new(HeapBackend))
    }

    /// Create an allocator drawing chunks from `backend`
    pub fn with_backend(chunk_size: usize, backend: Arc<dyn ChunkBackend>) -> Self {
        let id = NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed);
        info!(allocator = id, chunk_size, "Initializing chunk allocator");

        Self {
            id,
            chunk_size,
            backend,
            state: Mutex::new(AllocatorState {
                chunks: Vec::new(),
                live: HashMap::new(),
                next_chunk: 0,
                next_serial: 0,
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reserve a buffer of exactly `size` bytes
    ///
    /// Existing chunks are tried newest first; a new chunk is requested
    /// from the backend only when none of them has a fitting free block.
    pub fn allocate(&self, size: usize) -> Result<BufferHandle> {
        if size == 0 {
            return Err(Error::InvalidArgument(
                "Cannot allocate a zero-sized buffer".to_string(),
            ));
        }
        if size > self.chunk_size {
            return Err(Error::InvalidArgument(format!(
                "Requested {} bytes exceeds chunk size {}",
                size, self.chunk_size
            )));
        }

        let mut state = self.state.lock();

        let found = state.chunks.iter_mut().rev().find_map(|slot| {
            slot.free
                .find_block_of_size(size)
                .map(|block| (slot.chunk.id(), block))
        });

        let (chunk_id, block) = match found {
            Some(reserved) => reserved,
            None => {
                let memory = self.backend.allocate_chunk(self.chunk_size)?;
                let chunk_id = ChunkId(state.next_chunk);
                state.next_chunk += 1;

                let mut free = FreeBlockManager::with_extent(self.chunk_size);
                let block = free.find_block_of_size(size).ok_or_else(|| {
                    Error::Allocation(format!("Fresh {} cannot hold {} bytes", chunk_id, size))
                })?;

                state.chunks.push(ChunkSlot {
                    chunk: Chunk::new(chunk_id, memory),
                    free,
                });
                metrics::CHUNKS_HELD.inc();
                info!(
                    allocator = self.id,
                    chunk = %chunk_id,
                    chunks = state.chunks.len(),
                    "Added chunk"
                );
                (chunk_id, block)
            }
        };

        let serial = state.next_serial;
        state.next_serial += 1;
        state
            .live
            .insert((chunk_id, block.position), LiveAllocation { block, serial });

        debug!(chunk = %chunk_id, block = %block, "Allocated buffer");

        Ok(BufferHandle {
            allocator: self.id,
            chunk: chunk_id,
            position: block.position,
            len: size,
            serial,
        })
    }

    /// Return a buffer to the free list of the chunk it came from
    pub fn free(&self, handle: BufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        let index = self.validate(&state, &handle)?;

        let live = state.live.remove(&handle.identity()).ok_or_else(|| {
            Error::Consistency(format!("Buffer at {} vanished", handle.position))
        })?;
        state.chunks[index].free.free_block(live.block);

        debug!(chunk = %handle.chunk, block = %live.block, "Freed buffer");
        Ok(())
    }

    /// Run `f` over the bytes of a live buffer
    pub fn with_buffer<R>(&self, handle: &BufferHandle, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.state.lock();
        let index = self.validate(&state, handle)?;
        Ok(f(state.chunks[index].chunk.bytes(handle.position, handle.len)))
    }

    /// Run `f` over the bytes of a live buffer, mutably
    pub fn with_buffer_mut<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut state = self.state.lock();
        let index = self.validate(&state, handle)?;
        Ok(f(state.chunks[index]
            .chunk
            .bytes_mut(handle.position, handle.len)))
    }

    /// Release every chunk and forget every allocation
    ///
    /// Outstanding handles become invalid; using them afterwards is
    /// reported as `Error::Consistency`.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let released = Self::release_all(self.backend.as_ref(), &mut state);
        if released > 0 {
            info!(allocator = self.id, chunks = released, "Released all chunks");
        }
    }

    fn release_all(backend: &dyn ChunkBackend, state: &mut AllocatorState) -> usize {
        state.live.clear();
        let released = state.chunks.len();
        for slot in state.chunks.drain(..) {
            backend.release_chunk(slot.chunk.into_memory());
            metrics::CHUNKS_HELD.dec();
        }
        released
    }

    fn validate(&self, state: &AllocatorState, handle: &BufferHandle) -> Result<usize> {
        if handle.allocator != self.id {
            return Err(Error::Consistency(format!(
                "Handle from allocator {} used with allocator {}",
                handle.allocator, self.id
            )));
        }

        match state.live.get(&handle.identity()) {
            Some(live) if live.serial == handle.serial => {}
            _ => {
                return Err(Error::Consistency(format!(
                    "Buffer at {}+{} is not live (double free or stale handle)",
                    handle.chunk, handle.position
                )))
            }
        }

        state
            .slot_index(handle.chunk)
            .ok_or_else(|| Error::Consistency(format!("Unknown {}", handle.chunk)))
    }

    /// Number of chunks currently held
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Number of buffers handed out and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Free blocks of every chunk, newest chunk first
    pub fn free_blocks(&self) -> Vec<(ChunkId, Vec<Block>)> {
        let state = self.state.lock();
        state
            .chunks
            .iter()
            .rev()
            .map(|slot| (slot.chunk.id(), slot.free.free_blocks().to_vec()))
            .collect()
    }

    /// Check that free and live blocks partition every chunk exactly
    pub fn verify(&self) -> Result<()> {
        let state = self.state.lock();

        for slot in &state.chunks {
            let id = slot.chunk.id();
            let mut blocks: Vec<Block> = slot.free.free_blocks().to_vec();
            blocks.extend(
                state
                    .live
                    .iter()
                    .filter(|((chunk, _), _)| *chunk == id)
                    .map(|(_, live)| live.block),
            );
            blocks.sort();

            let mut cursor = 0;
            for block in &blocks {
                if block.position != cursor {
                    return Err(Error::Consistency(format!(
                        "{}: expected a block at {}, found {}",
                        id, cursor, block
                    )));
                }
                cursor = block.end();
            }
            if cursor != slot.chunk.size() {
                return Err(Error::Consistency(format!(
                    "{}: blocks cover {} of {} bytes",
                    id,
                    cursor,
                    slot.chunk.size()
                )));
            }
        }

        Ok(())
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            chunk_size: self.chunk_size,
            chunk_count: state.chunks.len(),
            live_allocations: state.live.len(),
            allocated_bytes: state.live.values().map(|live| live.block.size).sum(),
            free_bytes: state.chunks.iter().map(|slot| slot.free.free_bytes()).sum(),
            free_blocks: state.chunks.iter().map(|slot| slot.free.len()).sum(),
        }
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        Self::release_all(self.backend.as_ref(), self.state.get_mut());
    }
}

/// Statistics for the chunk allocator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub live_allocations: usize,
    pub allocated_bytes: usize,
    pub free_bytes: usize,
    pub free_blocks: usize,
}
