//! Property-Based Tests for the Chunk Allocator
//!
//! # Test Properties
//!
//! 1. **Coalescing**: freeing every reserved block in any order restores
//!    a single free block spanning the extent
//! 2. **Partition**: after any allocate/free sequence, live and free
//!    blocks of every chunk tile it with no gap and no overlap
//! 3. **Budget**: an LRU map never keeps more than its budget resident,
//!    and its running total matches the allocator's live bytes

#![cfg(test)]

use proptest::prelude::*;

use super::{Block, BufferHandle, ChunkAllocator, FreeBlockManager};
use crate::cache::{BytesBroker, LruObjectMap, ObjectCache};
use crate::store::MemoryCacheStore;

const EXTENT: usize = 4096;

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Free(usize),
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Request sizes that always fit a chunk of `EXTENT` bytes
fn size_strategy() -> impl Strategy<Value = usize> {
    1usize..=EXTENT / 4
}

/// Sizes together with a permutation seed for the free order
fn free_order_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(size_strategy(), 1..24).prop_flat_map(|sizes| {
        let n = sizes.len();
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (Just(sizes), order)
    })
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..=EXTENT).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

// =============================================================================
// Free Block Manager Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: all blocks freed, in any order, coalesce back to one.
    #[test]
    fn prop_free_in_any_order_coalesces((sizes, order) in free_order_strategy()) {
        let mut manager = FreeBlockManager::with_extent(EXTENT);

        let reserved: Vec<Option<Block>> = sizes
            .iter()
            .map(|&size| manager.find_block_of_size(size))
            .collect();

        for index in order {
            if let Some(block) = reserved[index] {
                manager.free_block(block);
            }
        }

        prop_assert_eq!(manager.free_blocks(), &[Block::new(0, EXTENT)][..]);
    }

    /// Property: the free list stays sorted, disjoint and non-adjacent.
    #[test]
    fn prop_free_list_stays_canonical((sizes, order) in free_order_strategy()) {
        let mut manager = FreeBlockManager::with_extent(EXTENT);

        let reserved: Vec<Option<Block>> = sizes
            .iter()
            .map(|&size| manager.find_block_of_size(size))
            .collect();

        for index in order.into_iter().step_by(2) {
            if let Some(block) = reserved[index] {
                manager.free_block(block);
            }

            for pair in manager.free_blocks().windows(2) {
                prop_assert!(pair[0].end() < pair[1].position);
            }
        }
    }
}

// =============================================================================
// Allocator Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: live and free blocks partition every chunk.
    #[test]
    fn prop_allocator_partitions_chunks(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let allocator = ChunkAllocator::new(EXTENT);
        let mut live: Vec<BufferHandle> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(size) => live.push(allocator.allocate(size)?),
                Op::Free(pick) if !live.is_empty() => {
                    let handle = live.swap_remove(pick % live.len());
                    allocator.free(handle)?;
                }
                Op::Free(_) => {}
            }

            allocator.verify()?;
            let stats = allocator.stats();
            prop_assert_eq!(stats.live_allocations, live.len());
            prop_assert_eq!(
                stats.allocated_bytes + stats.free_bytes,
                stats.chunk_count * EXTENT
            );
        }

        for handle in live.drain(..) {
            allocator.free(handle)?;
        }
        let stats = allocator.stats();
        prop_assert_eq!(stats.free_blocks, stats.chunk_count);
    }

    /// Property: bytes written through a handle are read back unchanged.
    #[test]
    fn prop_buffers_do_not_alias(sizes in prop::collection::vec(size_strategy(), 1..32)) {
        let allocator = ChunkAllocator::new(EXTENT);

        let handles = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let handle = allocator.allocate(size)?;
                allocator.with_buffer_mut(&handle, |buf| buf.fill(i as u8))?;
                Ok(handle)
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        for (i, handle) in handles.iter().enumerate() {
            let intact = allocator.with_buffer(handle, |buf| buf.iter().all(|&b| b == i as u8))?;
            prop_assert!(intact);
        }
    }
}

// =============================================================================
// LRU Budget Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: resident bytes never exceed the budget after a put.
    #[test]
    fn prop_lru_respects_budget(
        puts in prop::collection::vec((0u8..16, size_strategy()), 1..48),
        budget in EXTENT..EXTENT * 3,
    ) {
        let map = LruObjectMap::new(ChunkAllocator::new(EXTENT), budget);
        let cache: ObjectCache<u8, BytesBroker> =
            ObjectCache::new(BytesBroker, Box::new(map), Box::new(MemoryCacheStore::new()));

        for (key, size) in puts {
            cache.put(key, &vec![key; size])?;

            let stats = cache.stats();
            prop_assert!(stats.map.resident_bytes <= budget);
            let allocated = stats.map.allocator.map(|a| a.allocated_bytes);
            prop_assert_eq!(allocated, Some(stats.map.resident_bytes));
        }

        for key in 0u8..16 {
            if let Some(value) = cache.get_once(&key, ())? {
                prop_assert!(value.iter().all(|&b| b == key));
            }
        }
    }
}
