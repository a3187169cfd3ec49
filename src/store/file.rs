//! Scratch file store
//!
//! All records live in one file. An in-memory index maps each key to the
//! block holding its record; freed blocks go to a coalescing free-block
//! manager and are reused first-fit, otherwise records are appended at the
//! end of the file.
//!
//! The file is scratch space: it is truncated on open and deleted on drop,
//! nothing survives a restart.

use super::{BufferSource, CacheStore, StoreStats};
use crate::alloc::{Block, FreeBlockManager};
use crate::error::{Error, Result};
use crate::metrics;
use crate::CacheKey;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "tiercache-";
const FILE_EXTENSION: &str = "cce";

static NEXT_FILE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

struct FileState<K> {
    file: File,
    index: HashMap<K, Block>,
    free: FreeBlockManager,
    /// End of the furthest block ever handed out
    extent: usize,
    stored: u64,
}

/// Single-file record store
pub struct FileCacheStore<K> {
    path: PathBuf,
    capacity: Option<u64>,
    state: Mutex<FileState<K>>,
}

impl<K: CacheKey> FileCacheStore<K> {
    /// Create (or truncate) a store file at `path`
    ///
    /// # Arguments
    /// * `path` - Scratch file location
    /// * `capacity` - Maximum file size in bytes (unbounded if `None`)
    pub fn open<P: AsRef<Path>>(path: P, capacity: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open store file {:?}: {}", path, e)))?;

        info!(path = ?path, capacity = ?capacity, "Opened file cache store");

        Ok(Self {
            path,
            capacity,
            state: Mutex::new(FileState {
                file,
                index: HashMap::new(),
                free: FreeBlockManager::new(),
                extent: 0,
                stored: 0,
            }),
        })
    }

    /// Create a fresh store file in `dir`
    ///
    /// Store files left behind by other processes are deleted first.
    pub fn create_in<P: AsRef<Path>>(dir: P, capacity: Option<u64>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create scratch dir {:?}: {}", dir, e)))?;

        let pid = std::process::id();
        Self::purge_stale_files(dir, pid);

        let sequence = NEXT_FILE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}{}-{}.{}", FILE_PREFIX, pid, sequence, FILE_EXTENSION);
        Self::open(dir.join(name), capacity)
    }

    fn purge_stale_files(dir: &Path, pid: u32) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Cannot scan scratch dir for stale store files");
                return;
            }
        };

        let own_prefix = format!("{}{}-", FILE_PREFIX, pid);
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_store_file = name.starts_with(FILE_PREFIX)
                && name.ends_with(&format!(".{}", FILE_EXTENSION));

            if !is_store_file || name.starts_with(&own_prefix) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = %name, "Removed stale store file"),
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stale store file"),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the store file to disk
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        state
            .file
            .sync_all()
            .map_err(|e| Error::Storage(format!("Flush failed: {}", e)))
    }

    /// Free regions of the file, in ascending position order
    pub fn free_blocks(&self) -> Vec<Block> {
        self.state.lock().free.free_blocks().to_vec()
    }

    fn reserve(&self, state: &mut FileState<K>, size: usize) -> Result<Block> {
        if let Some(block) = state.free.find_block_of_size(size) {
            return Ok(block);
        }

        let end = state.extent + size;
        if let Some(capacity) = self.capacity {
            if end as u64 > capacity {
                return Err(Error::Allocation(format!(
                    "Store file would grow to {} bytes, capacity is {}",
                    end, capacity
                )));
            }
        }

        let block = Block::new(state.extent, size);
        state.extent = end;
        Ok(block)
    }

    fn write_at(file: &mut File, position: usize, bytes: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(position as u64))
            .map_err(|e| Error::Storage(format!("Seek failed: {}", e)))?;
        file.write_all(bytes)
            .map_err(|e| Error::Storage(format!("Write failed: {}", e)))
    }

    fn read_at(file: &mut File, block: Block) -> Result<Bytes> {
        file.seek(SeekFrom::Start(block.position as u64))
            .map_err(|e| Error::Storage(format!("Seek failed: {}", e)))?;

        let mut data = BytesMut::zeroed(block.size);
        file.read_exact(&mut data)
            .map_err(|e| Error::Storage(format!("Read failed: {}", e)))?;
        Ok(data.freeze())
    }
}

impl<K: CacheKey> BufferSource for FileCacheStore<K> {
    fn acquire(&self, size: usize) -> Result<BytesMut> {
        if let Some(capacity) = self.capacity {
            if size as u64 > capacity {
                return Err(Error::Allocation(format!(
                    "Record of {} bytes exceeds store capacity {}",
                    size, capacity
                )));
            }
        }
        Ok(BytesMut::zeroed(size))
    }
}

impl<K: CacheKey> CacheStore<K> for FileCacheStore<K> {
    fn read(&self, key: &K) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let block = match state.index.get(key) {
            Some(block) => *block,
            None => return Ok(None),
        };

        let data = Self::read_at(&mut state.file, block)?;
        metrics::STORE_READS.inc();
        debug!(key = ?key, block = %block, "Read record");
        Ok(Some(data))
    }

    fn take(&self, key: &K) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let block = match state.index.get(key) {
            Some(block) => *block,
            None => return Ok(None),
        };

        let data = Self::read_at(&mut state.file, block)?;
        state.index.remove(key);
        state.free.free_block(block);
        state.stored -= block.size as u64;

        metrics::STORE_READS.inc();
        debug!(key = ?key, block = %block, "Took record");
        Ok(Some(data))
    }

    fn write(&self, key: &K, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Empty record for key {:?}",
                key
            )));
        }

        let mut state = self.state.lock();
        let block = self.reserve(&mut state, bytes.len())?;

        if let Err(e) = Self::write_at(&mut state.file, block.position, bytes) {
            state.free.free_block(block);
            warn!(key = ?key, block = %block, error = %e, "Record write failed");
            return Err(e);
        }

        if let Some(old) = state.index.insert(key.clone(), block) {
            state.free.free_block(old);
            state.stored -= old.size as u64;
        }
        state.stored += block.size as u64;

        metrics::STORE_WRITES.inc();
        debug!(key = ?key, block = %block, "Wrote record");
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<bool> {
        let mut state = self.state.lock();
        match state.index.remove(key) {
            Some(block) => {
                state.free.free_block(block);
                state.stored -= block.size as u64;
                debug!(key = ?key, block = %block, "Removed record");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.state.lock().index.contains_key(key)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.index.clear();
        state.free.clear();
        state.extent = 0;
        state.stored = 0;
        state
            .file
            .set_len(0)
            .map_err(|e| Error::Storage(format!("Failed to truncate store file: {}", e)))
    }

    fn buffer_source(&self) -> &dyn BufferSource {
        self
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            records: state.index.len(),
            stored_bytes: state.stored,
            reserved_bytes: state.extent as u64,
        }
    }
}

impl<K> Drop for FileCacheStore<K> {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Deleted store file"),
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to delete store file"),
        }
    }
}
