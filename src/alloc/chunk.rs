//! Chunks of raw cache memory and the backends that supply them

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Identifier of a chunk, unique within one allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// Source of chunk memory
pub trait ChunkBackend: Send + Sync {
    /// Obtain `size` zeroed bytes
    fn allocate_chunk(&self, size: usize) -> Result<Box<[u8]>>;

    /// Give memory obtained from `allocate_chunk` back
    fn release_chunk(&self, memory: Box<[u8]>) {
        drop(memory);
    }
}

/// Process heap backend
///
/// Reserves fallibly so exhaustion surfaces as `Error::Allocation`
/// instead of aborting the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBackend;

impl ChunkBackend for HeapBackend {
    fn allocate_chunk(&self, size: usize) -> Result<Box<[u8]>> {
        let mut memory = Vec::new();
        memory.try_reserve_exact(size).map_err(|e| {
            Error::Allocation(format!("Failed to reserve {} byte chunk: {}", size, e))
        })?;
        memory.resize(size, 0);
        Ok(memory.into_boxed_slice())
    }
}

/// Heap backend with a cap on outstanding chunks
#[derive(Debug)]
pub struct BoundedBackend {
    max_chunks: usize,
    outstanding: AtomicUsize,
}

impl BoundedBackend {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            max_chunks,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Chunks handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }
}

impl ChunkBackend for BoundedBackend {
    fn allocate_chunk(&self, size: usize) -> Result<Box<[u8]>> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_chunks).then_some(count + 1)
            })
            .map_err(|count| {
                Error::Allocation(format!(
                    "Chunk limit reached ({} of {} outstanding)",
                    count, self.max_chunks
                ))
            })?;

        HeapBackend.allocate_chunk(size).inspect_err(|_| {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        })
    }

    fn release_chunk(&self, memory: Box<[u8]>) {
        drop(memory);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One fixed-size contiguous region of cache memory
pub struct Chunk {
    id: ChunkId,
    memory: Box<[u8]>,
}

impl Chunk {
    pub(crate) fn new(id: ChunkId, memory: Box<[u8]>) -> Self {
        debug!(chunk = %id, size = memory.len(), "Created chunk");
        Self { id, memory }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub(crate) fn bytes(&self, position: usize, len: usize) -> &[u8] {
        &self.memory[position..position + len]
    }

    pub(crate) fn bytes_mut(&mut self, position: usize, len: usize) -> &mut [u8] {
        &mut self.memory[position..position + len]
    }

    pub(crate) fn into_memory(self) -> Box<[u8]> {
        self.memory
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("size", &self.memory.len())
            .finish()
    }
}
