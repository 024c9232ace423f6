//! Buffer Pool - fixed-capacity page cache with pin counts and LRU eviction
//!
//! Pages are keyed by `(file, block)`. [`BufferPool::get_page`] pins a page
//! and hands out a [`PageGuard`]; dropping the guard unpins it on every exit
//! path, carrying the dirty flag if the page was written through the guard.
//!
//! Eviction scans from the least-recently-used end, skips pinned pages,
//! writes the first unpinned victim back if dirty and drops it. When every
//! resident page is pinned the request fails with
//! [`StorageError::BufferPoolExhausted`].

use crate::storage::{BlockId, DiskManager};
use crate::{Result, StorageError};
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Page key: (file, block)
pub type PageKey = (String, BlockId);

/// One resident page
#[derive(Debug)]
struct Frame {
    data: RwLock<Vec<u8>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    fn pins(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

/// Buffer pool statistics
#[derive(Debug, Default, Clone)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Pages written back to disk
    pub flushes: u64,
    /// Resident pages
    pub size: usize,
    pub capacity: usize,
}

impl BufferPoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct BufferPool {
    disk: Arc<DiskManager>,
    capacity: usize,
    /// Resident pages in recency order (front = most recently used)
    frames: Mutex<LruCache<PageKey, Arc<Frame>>>,
    stats: Mutex<BufferPoolStats>,
}

/// Scope-bound pin on a resident page
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    key: PageKey,
    frame: Arc<Frame>,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub fn file(&self) -> &str {
        &self.key.0
    }

    pub fn block(&self) -> BlockId {
        self.key.1
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.frame.data.read()
    }

    /// Write access; the page is unpinned dirty when the guard drops.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.dirty = true;
        self.frame.data.write()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.unpin_page(&self.key.0, self.key.1, self.dirty);
    }
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, capacity: usize) -> Self {
        Self {
            disk,
            capacity,
            frames: Mutex::new(LruCache::unbounded()),
            stats: Mutex::new(BufferPoolStats {
                capacity,
                ..Default::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.disk.block_size()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Pin `(file, block)`, loading it on a miss, and move it to the
    /// most-recently-used end.
    pub fn get_page(&self, file: &str, block: BlockId) -> Result<PageGuard<'_>> {
        let key: PageKey = (file.to_string(), block);
        let mut frames = self.frames.lock();

        if let Some(frame) = frames.get(&key) {
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            let frame = Arc::clone(frame);
            self.stats.lock().hits += 1;
            return Ok(PageGuard {
                pool: self,
                key,
                frame,
                dirty: false,
            });
        }

        self.stats.lock().misses += 1;
        if frames.len() >= self.capacity {
            self.evict_one(&mut frames)?;
        }

        let mut data = vec![0u8; self.disk.block_size()];
        self.disk.read_block(file, block, &mut data)?;
        let frame = Arc::new(Frame::new(data));
        frame.pin_count.store(1, Ordering::SeqCst);
        frames.put(key.clone(), Arc::clone(&frame));

        Ok(PageGuard {
            pool: self,
            key,
            frame,
            dirty: false,
        })
    }

    fn evict_one(&self, frames: &mut LruCache<PageKey, Arc<Frame>>) -> Result<()> {
        let victim = frames
            .iter()
            .rev()
            .find(|(_, frame)| frame.pins() == 0)
            .map(|(key, frame)| (key.clone(), Arc::clone(frame)));

        let (key, frame) = victim.ok_or(StorageError::BufferPoolExhausted {
            capacity: self.capacity,
        })?;

        if frame.is_dirty() {
            self.disk.write_block(&key.0, key.1, &frame.data.read())?;
            frame.dirty.store(false, Ordering::SeqCst);
            self.stats.lock().flushes += 1;
        }
        frames.pop(&key);
        self.stats.lock().evictions += 1;
        debug!(file = %key.0, block = key.1, "evicted page");
        Ok(())
    }

    /// Drop one pin on `(file, block)`, OR-ing in `is_dirty`.
    ///
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, file: &str, block: BlockId, is_dirty: bool) -> bool {
        let frames = self.frames.lock();
        let Some(frame) = frames.peek(&(file.to_string(), block)) else {
            return false;
        };
        if is_dirty {
            frame.dirty.store(true, Ordering::SeqCst);
        }
        frame
            .pin_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pins| pins.checked_sub(1))
            .is_ok()
    }

    /// Write one page back if it is dirty
    pub fn force_page(&self, file: &str, block: BlockId) -> Result<()> {
        let frames = self.frames.lock();
        if let Some(frame) = frames.peek(&(file.to_string(), block)) {
            if frame.is_dirty() {
                self.disk.write_block(file, block, &frame.data.read())?;
                frame.dirty.store(false, Ordering::SeqCst);
                self.stats.lock().flushes += 1;
            }
        }
        self.disk.sync(file)?;
        Ok(())
    }

    /// Write back every dirty page and sync the files. Returns the number of
    /// pages written.
    pub fn flush_all_pages(&self) -> Result<usize> {
        let frames = self.frames.lock();
        let mut written = 0;
        for ((file, block), frame) in frames.iter() {
            if frame.is_dirty() {
                self.disk.write_block(file, *block, &frame.data.read())?;
                frame.dirty.store(false, Ordering::SeqCst);
                written += 1;
            }
        }
        drop(frames);
        self.disk.sync_all()?;
        self.stats.lock().flushes += written as u64;
        Ok(written)
    }

    /// Drop every unpinned page of `file` without writing it back
    pub fn discard_file(&self, file: &str) {
        let mut frames = self.frames.lock();
        let keys: Vec<PageKey> = frames
            .iter()
            .filter(|((f, _), frame)| f == file && frame.pins() == 0)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            frames.pop(&key);
        }
    }

    pub fn pin_count(&self, file: &str, block: BlockId) -> Option<u32> {
        self.frames
            .lock()
            .peek(&(file.to_string(), block))
            .map(|frame| frame.pins())
    }

    pub fn is_dirty(&self, file: &str, block: BlockId) -> Option<bool> {
        self.frames
            .lock()
            .peek(&(file.to_string(), block))
            .map(|frame| frame.is_dirty())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferPoolStats {
        let mut stats = self.stats.lock().clone();
        stats.size = self.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_pool(capacity: usize) -> (BufferPool, Arc<DiskManager>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(temp_dir.path(), 512).unwrap());
        let pool = BufferPool::new(Arc::clone(&disk), capacity);
        (pool, disk, temp_dir)
    }

    #[test]
    fn test_miss_zero_fills_and_pins() {
        let (pool, _disk, _temp) = create_test_pool(4);
        let page = pool.get_page("t", 9).unwrap();
        assert!(page.read().iter().all(|b| *b == 0));
        assert_eq!(pool.pin_count("t", 9), Some(1));
        drop(page);
        assert_eq!(pool.pin_count("t", 9), Some(0));
        assert_eq!(pool.is_dirty("t", 9), Some(false));
    }

    #[test]
    fn test_guard_write_marks_dirty() {
        let (pool, disk, _temp) = create_test_pool(4);
        {
            let mut page = pool.get_page("t", 0).unwrap();
            page.write()[0] = 0xAB;
        }
        assert_eq!(pool.is_dirty("t", 0), Some(true));

        // Not on disk until flushed
        let mut buf = vec![0u8; 512];
        disk.read_block("t", 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0);

        assert_eq!(pool.flush_all_pages().unwrap(), 1);
        disk.read_block("t", 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(pool.is_dirty("t", 0), Some(false));
    }

    #[test]
    fn test_nested_pins() {
        let (pool, _disk, _temp) = create_test_pool(4);
        let a = pool.get_page("t", 1).unwrap();
        let b = pool.get_page("t", 1).unwrap();
        assert_eq!(pool.pin_count("t", 1), Some(2));
        drop(a);
        assert_eq!(pool.pin_count("t", 1), Some(1));
        drop(b);
        assert_eq!(pool.pin_count("t", 1), Some(0));
        assert!(!pool.unpin_page("t", 1, false));
        assert!(!pool.unpin_page("t", 77, false));
    }

    #[test]
    fn test_lru_eviction_writes_back_dirty_victim() {
        let (pool, disk, _temp) = create_test_pool(4);
        for block in 0..4 {
            let mut page = pool.get_page("t", block).unwrap();
            page.write()[0] = block as u8 + 1;
        }
        // Touch block 0 so block 1 becomes least recently used
        drop(pool.get_page("t", 0).unwrap());

        drop(pool.get_page("t", 10).unwrap());
        assert_eq!(pool.len(), 4);
        assert!(pool.pin_count("t", 1).is_none());
        assert!(pool.pin_count("t", 0).is_some());

        let mut buf = vec![0u8; 512];
        disk.read_block("t", 1, &mut buf).unwrap();
        assert_eq!(buf[0], 2);

        let stats = pool.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 5);
    }

    #[test]
    fn test_eviction_skips_pinned_pages() {
        let (pool, _disk, _temp) = create_test_pool(4);
        let _held = pool.get_page("t", 0).unwrap();
        for block in 1..4 {
            drop(pool.get_page("t", block).unwrap());
        }
        drop(pool.get_page("t", 4).unwrap());
        // Block 0 was least recently used but pinned; block 1 went instead
        assert!(pool.pin_count("t", 0).is_some());
        assert!(pool.pin_count("t", 1).is_none());
    }

    #[test]
    fn test_all_pinned_is_exhausted() {
        let capacity = 5;
        let (pool, _disk, _temp) = create_test_pool(capacity);
        let guards: Vec<_> = (0..capacity as u64)
            .map(|block| pool.get_page("t", block).unwrap())
            .collect();

        let result = pool.get_page("t", 99);
        assert!(matches!(
            result,
            Err(StorageError::BufferPoolExhausted { capacity: 5 })
        ));
        // Resident hits still work while exhausted
        drop(pool.get_page("t", 0).unwrap());

        drop(guards);
        assert!(pool.get_page("t", 99).is_ok());
    }

    #[test]
    fn test_force_page() {
        let (pool, disk, _temp) = create_test_pool(4);
        {
            let mut page = pool.get_page("t", 2).unwrap();
            page.write()[5] = 5;
        }
        pool.force_page("t", 2).unwrap();
        let mut buf = vec![0u8; 512];
        disk.read_block("t", 2, &mut buf).unwrap();
        assert_eq!(buf[5], 5);
        assert_eq!(pool.is_dirty("t", 2), Some(false));
    }

    #[test]
    fn test_discard_file() {
        let (pool, _disk, _temp) = create_test_pool(4);
        drop(pool.get_page("a", 0).unwrap());
        drop(pool.get_page("b", 0).unwrap());
        pool.discard_file("a");
        assert!(pool.pin_count("a", 0).is_none());
        assert!(pool.pin_count("b", 0).is_some());
    }
}
