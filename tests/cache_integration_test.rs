//! End-to-end tests for the tiered object cache

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tiercache::alloc::{Block, ChunkAllocator, FreeBlockManager};
use tiercache::cache::SampleFormat;
use tiercache::error::Error;
use tiercache::{
    BytesBroker, CacheConfig, CacheStore, FileCacheStore, LruObjectMap, MemoryCacheStore,
    ObjectCache, TileBroker, TileData, TileLayout,
};

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tiercache_{}_{}", name, std::process::id()))
}

fn file_backed_lru(
    name: &str,
    chunk_size: usize,
    budget: usize,
) -> ObjectCache<&'static str, BytesBroker> {
    let store = FileCacheStore::create_in(scratch_dir(name), None)
        .expect("Failed to create file store");
    ObjectCache::new(
        BytesBroker,
        Box::new(LruObjectMap::new(ChunkAllocator::new(chunk_size), budget)),
        Box::new(store),
    )
}

#[test]
fn test_lru_spills_only_the_oldest_entry() {
    let cache = file_backed_lru("spill_oldest", 1024, 2048);

    cache.put("a", &vec![b'a'; 800]).expect("put a");
    cache.put("b", &vec![b'b'; 800]).expect("put b");
    cache.put("c", &vec![b'c'; 800]).expect("put c");

    let stats = cache.stats();
    assert_eq!(stats.map.spills, 1);
    assert_eq!(stats.map.resident_bytes, 1600);
    assert_eq!(stats.store.records, 1);
    assert_eq!(stats.store.stored_bytes, 800);

    // "a" now lives in the scratch file
    assert!(cache.contains(&"a").expect("contains a"));
    assert_eq!(cache.get_once(&"a", ()).expect("get a"), Some(vec![b'a'; 800]));
    assert_eq!(cache.get_once(&"b", ()).expect("get b"), Some(vec![b'b'; 800]));
    assert_eq!(cache.get_once(&"c", ()).expect("get c"), Some(vec![b'c'; 800]));

    // Taking "a" back emptied the scratch file
    let stats = cache.stats();
    assert_eq!(stats.store.records, 0);
    assert_eq!(stats.store.stored_bytes, 0);
    assert!(!cache.contains(&"a").expect("contains a"));
}

#[test]
fn test_free_blocks_coalesce_only_when_adjacent() {
    let mut manager = FreeBlockManager::with_extent(1024);

    let first = manager.find_block_of_size(100).expect("100-byte block");
    let second = manager.find_block_of_size(200).expect("200-byte block");
    assert_eq!(first, Block::new(0, 100));
    assert_eq!(second, Block::new(100, 200));
    assert_eq!(manager.free_blocks(), &[Block::new(300, 724)]);

    manager.free_block(first);
    assert_eq!(
        manager.free_blocks(),
        &[Block::new(0, 100), Block::new(300, 724)]
    );

    manager.free_block(second);
    assert_eq!(manager.free_blocks(), &[Block::new(0, 1024)]);
}

#[test]
fn test_oversized_allocation_creates_no_chunk() {
    let allocator = ChunkAllocator::new(1024);

    let err = allocator.allocate(1025).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(allocator.chunk_count(), 0);
}

#[test]
fn test_absent_key_is_not_found() {
    let cache: ObjectCache<&'static str, BytesBroker> = ObjectCache::with_lru(
        BytesBroker,
        1024,
        2048,
        Box::new(MemoryCacheStore::new()),
    );

    assert_eq!(cache.get_once(&"nothing", ()).expect("get"), None);
    assert!(!cache.contains(&"nothing").expect("contains"));
}

#[test]
fn test_file_store_reuses_freed_regions() {
    let dir = scratch_dir("reuse");
    let store: FileCacheStore<u32> =
        FileCacheStore::create_in(&dir, None).expect("Failed to create file store");

    store.write(&1, &[1u8; 256]).expect("write 1");
    store.write(&2, &[2u8; 256]).expect("write 2");
    assert!(store.remove(&1).expect("remove 1"));
    assert_eq!(store.free_blocks(), vec![Block::new(0, 256)]);

    store.write(&3, &[3u8; 128]).expect("write 3");
    assert_eq!(store.free_blocks(), vec![Block::new(128, 128)]);

    assert_eq!(store.read(&3).expect("read 3").as_deref(), Some(&[3u8; 128][..]));
    assert_eq!(store.read(&2).expect("read 2").as_deref(), Some(&[2u8; 256][..]));

    let stats = store.stats();
    assert_eq!(stats.records, 2);
    assert_eq!(stats.stored_bytes, 384);

    let path = store.path().to_path_buf();
    drop(store);
    assert!(!path.exists(), "Store file should be removed on drop");
}

#[test]
fn test_tiles_spill_and_reload_from_file() {
    let config = CacheConfig {
        chunk_size: 64 * 1024,
        memory_budget: 128 * 1024,
        write_through_threshold: 0,
        scratch_dir: Some(scratch_dir("tiles")),
        ..CacheConfig::default()
    };
    let cache: ObjectCache<u64, TileBroker> =
        ObjectCache::from_config(TileBroker, &config).expect("Failed to build cache");

    let layout = TileLayout::new(SampleFormat::U16, 8192);
    let tile = |seed: u64| TileData::U16((0..8192).map(|i| (seed as u16).wrapping_add(i)).collect());

    for key in 0..16 {
        cache.put(key, &tile(key)).expect("put tile");
    }

    let stats = cache.stats();
    assert!(stats.map.resident_bytes <= 128 * 1024);
    assert_eq!(stats.map.spills + stats.map.resident_entries as u64, 16);

    for key in 0..16 {
        let back = cache.get_once(&key, layout).expect("get tile");
        assert_eq!(back, Some(tile(key)), "tile {} altered", key);
    }

    // Wrong layout hint is a codec error, not a silent reinterpretation
    cache.put(99, &tile(99)).expect("put tile");
    let wrong = TileLayout::new(SampleFormat::I32, 8192);
    assert!(matches!(cache.get_once(&99, wrong), Err(Error::Codec(_))));

    cache.dispose().expect("dispose");
}

#[test]
fn test_small_budget_writes_through() {
    let config = CacheConfig {
        memory_budget: 1024 * 1024,
        scratch_dir: Some(scratch_dir("write_through")),
        ..CacheConfig::default()
    };
    assert!(config.uses_write_through());

    let cache: ObjectCache<&'static str, BytesBroker> =
        ObjectCache::from_config(BytesBroker, &config).expect("Failed to build cache");

    cache.put("x", &b"through".to_vec()).expect("put");
    let stats = cache.stats();
    assert_eq!(stats.map.resident_entries, 0);
    assert_eq!(stats.store.records, 1);
    assert_eq!(cache.get_once(&"x", ()).expect("get"), Some(b"through".to_vec()));
}

#[test]
fn test_concurrent_puts_and_gets() {
    let store = FileCacheStore::create_in(scratch_dir("concurrent"), None)
        .expect("Failed to create file store");
    let cache: Arc<ObjectCache<u64, BytesBroker>> = Arc::new(ObjectCache::new(
        BytesBroker,
        Box::new(LruObjectMap::new(ChunkAllocator::new(4096), 16 * 1024)),
        Box::new(store),
    ));

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..64u64 {
                    let key = worker * 1000 + i;
                    let payload = vec![(key % 251) as u8; 100 + (i as usize * 37) % 900];
                    cache.put(key, &payload).expect("put");
                }
                for i in 0..64u64 {
                    let key = worker * 1000 + i;
                    let expected = vec![(key % 251) as u8; 100 + (i as usize * 37) % 900];
                    let back = cache.get_once(&key, ()).expect("get");
                    assert_eq!(back, Some(expected), "key {}", key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let stats = cache.stats();
    assert_eq!(stats.map.resident_entries, 0);
    assert_eq!(stats.map.resident_bytes, 0);
    assert_eq!(stats.map.hits + stats.map.misses, 8 * 64);

    if let Some(allocator) = stats.map.allocator {
        assert_eq!(allocator.live_allocations, 0);
        assert_eq!(allocator.free_blocks, allocator.chunk_count);
    }
}
