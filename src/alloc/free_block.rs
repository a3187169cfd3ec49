//! Coalescing free-block management for one region

use super::block::Block;

/// Free list of one chunk (or one store file)
///
/// Keeps disjoint free blocks sorted by position. Two listed blocks are
/// never adjacent: a freed block is merged with its neighbours before it
/// is inserted.
///
/// Lookup is first-fit in ascending position order.
#[derive(Debug, Clone, Default)]
pub struct FreeBlockManager {
    free: Vec<Block>,
}

impl FreeBlockManager {
    /// Create an empty manager (nothing free)
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Create a manager with one free block spanning `[0, extent)`
    pub fn with_extent(extent: usize) -> Self {
        let mut manager = Self::new();
        if extent > 0 {
            manager.free.push(Block::new(0, extent));
        }
        manager
    }

    /// Forget every free block
    pub fn clear(&mut self) {
        self.free.clear();
    }

    /// Reserve `size` bytes
    ///
    /// An exact match is removed from the list. Otherwise the first larger
    /// block gives up its leading `size` bytes and keeps the remainder.
    /// Returns `None` when nothing fits.
    pub fn find_block_of_size(&mut self, size: usize) -> Option<Block> {
        debug_assert!(size > 0, "zero-sized block request");

        let index = self.free.iter().position(|block| block.size >= size)?;
        if self.free[index].size == size {
            return Some(self.free.remove(index));
        }

        let candidate = &mut self.free[index];
        let reserved = Block::new(candidate.position, size);
        candidate.position += size;
        candidate.size -= size;
        Some(reserved)
    }

    /// Return a block to the free list, merging it with free neighbours
    pub fn free_block(&mut self, block: Block) {
        debug_assert!(block.size > 0, "zero-sized block freed");

        let index = self
            .free
            .partition_point(|free| free.position < block.position);

        debug_assert!(
            index == 0 || !self.free[index - 1].overlaps(&block),
            "freed block {} overlaps free block {}",
            block,
            self.free[index - 1]
        );
        debug_assert!(
            index == self.free.len() || !self.free[index].overlaps(&block),
            "freed block {} overlaps free block {}",
            block,
            self.free[index]
        );

        let joins_previous = index > 0 && self.free[index - 1].is_adjacent_to(&block);
        let joins_next = index < self.free.len() && block.is_adjacent_to(&self.free[index]);

        match (joins_previous, joins_next) {
            (true, true) => {
                let next = self.free.remove(index);
                self.free[index - 1].size += block.size + next.size;
            }
            (true, false) => {
                self.free[index - 1].size += block.size;
            }
            (false, true) => {
                let next = &mut self.free[index];
                next.position = block.position;
                next.size += block.size;
            }
            (false, false) => {
                self.free.insert(index, block);
            }
        }
    }

    /// Free blocks in ascending position order
    pub fn free_blocks(&self) -> &[Block] {
        &self.free
    }

    /// Total number of free bytes
    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|block| block.size).sum()
    }

    /// Size of the largest free block
    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|block| block.size).max().unwrap_or(0)
    }

    /// Number of free blocks
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
