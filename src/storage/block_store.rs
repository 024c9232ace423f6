//! Block Store - allocation graph and logged block writes
//!
//! Block 0 of every table file is the table header and block 1 the
//! allocation graph: one tag byte per addressable block. The graph is the
//! only record of which blocks are in use and as what.
//!
//! All writes go through [`BlockStore`]: the page is pinned, the new image is
//! appended to the WAL, then the image is copied into the page, which is
//! unpinned dirty. A page therefore never reaches disk before its log record.

use super::BlockId;
use crate::cache::{BufferPool, PageGuard};
use crate::txn::{TxnId, WalManager};
use crate::{Result, StorageError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Table header block
pub const HEADER_BLOCK: BlockId = 0;
/// Allocation graph block
pub const GRAPH_BLOCK: BlockId = 1;
/// Blocks present in a freshly created file (header, graph, four free)
pub const INITIAL_BLOCKS: u64 = 6;

/// Tag of a block in the allocation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    /// Past the end of the allocated file
    Unavailable = 0,
    Free = 1,
    TableHeader = 2,
    AllocationGraph = 3,
    Internal = 4,
    Leaf = 5,
    Record = 6,
}

impl BlockType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => BlockType::Unavailable,
            1 => BlockType::Free,
            2 => BlockType::TableHeader,
            3 => BlockType::AllocationGraph,
            4 => BlockType::Internal,
            5 => BlockType::Leaf,
            6 => BlockType::Record,
            _ => return None,
        })
    }

    /// Whether the block belongs to some structure
    pub fn is_in_use(&self) -> bool {
        !matches!(self, BlockType::Unavailable | BlockType::Free)
    }
}

/// Byte-per-block tag array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationGraph {
    tags: Vec<BlockType>,
}

impl AllocationGraph {
    /// Layout of a new table file of `capacity` addressable blocks
    pub fn new_table(capacity: usize) -> Self {
        let mut tags = vec![BlockType::Unavailable; capacity];
        for (i, tag) in tags.iter_mut().enumerate().take(INITIAL_BLOCKS as usize) {
            *tag = match i as BlockId {
                HEADER_BLOCK => BlockType::TableHeader,
                GRAPH_BLOCK => BlockType::AllocationGraph,
                _ => BlockType::Free,
            };
        }
        Self { tags }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tags = bytes
            .iter()
            .enumerate()
            .map(|(i, tag)| {
                BlockType::from_tag(*tag).ok_or_else(|| {
                    StorageError::Corruption(format!("block {} has unknown tag {}", i, tag))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if tags.get(HEADER_BLOCK as usize) != Some(&BlockType::TableHeader)
            || tags.get(GRAPH_BLOCK as usize) != Some(&BlockType::AllocationGraph)
        {
            return Err(StorageError::Corruption(
                "allocation graph does not tag its header and graph blocks".into(),
            ));
        }
        Ok(Self { tags })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.tags.iter().map(|t| *t as u8).collect()
    }

    /// Number of addressable blocks
    pub fn capacity(&self) -> usize {
        self.tags.len()
    }

    pub fn get(&self, block: BlockId) -> BlockType {
        self.tags
            .get(block as usize)
            .copied()
            .unwrap_or(BlockType::Unavailable)
    }

    pub fn set(&mut self, block: BlockId, block_type: BlockType) -> Result<()> {
        let slot = self.tags.get_mut(block as usize).ok_or_else(|| {
            StorageError::InvalidArgument(format!("block {} is not addressable", block))
        })?;
        *slot = block_type;
        Ok(())
    }

    pub fn first_free(&self) -> Option<BlockId> {
        self.tags
            .iter()
            .position(|t| *t == BlockType::Free)
            .map(|i| i as BlockId)
    }

    /// First block past the allocated part of the file
    pub fn first_unavailable(&self) -> Option<BlockId> {
        self.tags
            .iter()
            .position(|t| *t == BlockType::Unavailable)
            .map(|i| i as BlockId)
    }

    pub fn count(&self, block_type: BlockType) -> usize {
        self.tags.iter().filter(|t| **t == block_type).count()
    }
}

/// Logged access to table files through the buffer pool
#[derive(Clone)]
pub struct BlockStore {
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
    /// Transaction that tags log records (0 outside a transaction)
    current_txn: Arc<AtomicU32>,
}

impl BlockStore {
    pub fn new(pool: Arc<BufferPool>, wal: Arc<WalManager>) -> Self {
        Self {
            pool,
            wal,
            current_txn: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    /// Blocks addressable by one allocation graph
    pub fn max_blocks(&self) -> usize {
        self.block_size()
    }

    // --- transactions ---

    pub fn begin(&self) -> Result<TxnId> {
        let txn = self.wal.begin()?;
        self.current_txn.store(txn, Ordering::SeqCst);
        Ok(txn)
    }

    pub fn commit(&self) -> Result<()> {
        let txn = self.current_txn.swap(0, Ordering::SeqCst);
        self.wal.commit(txn)?;
        Ok(())
    }

    /// Log Abort. Pages the transaction already wrote keep their new
    /// images; nothing is undone.
    pub fn abort(&self) -> Result<()> {
        let txn = self.current_txn.swap(0, Ordering::SeqCst);
        self.wal.abort(txn)?;
        Ok(())
    }

    pub fn current_txn(&self) -> TxnId {
        self.current_txn.load(Ordering::SeqCst)
    }

    // --- blocks ---

    /// Pin a block for reading
    pub fn page(&self, file: &str, block: BlockId) -> Result<PageGuard<'_>> {
        self.pool.get_page(file, block)
    }

    /// Copy of a block's current image
    pub fn read_block(&self, file: &str, block: BlockId) -> Result<Vec<u8>> {
        let page = self.pool.get_page(file, block)?;
        let image = page.read().clone();
        Ok(image)
    }

    fn check_image(&self, image: &[u8]) -> Result<()> {
        if image.len() != self.block_size() {
            return Err(StorageError::InvalidArgument(format!(
                "image of {} bytes, block size is {}",
                image.len(),
                self.block_size()
            )));
        }
        Ok(())
    }

    /// Install a full new image, logged as an Insert record
    pub fn write_block(&self, file: &str, block: BlockId, image: &[u8]) -> Result<()> {
        self.check_image(image)?;
        let mut page = self.pool.get_page(file, block)?;
        self.wal.log_insert(self.current_txn(), file, block, image)?;
        page.write().copy_from_slice(image);
        Ok(())
    }

    /// Install a new image, logged as an Update record carrying the old image
    pub fn update_block(&self, file: &str, block: BlockId, image: &[u8]) -> Result<()> {
        self.check_image(image)?;
        let mut page = self.pool.get_page(file, block)?;
        let old = page.read().clone();
        self.wal
            .log_update(self.current_txn(), file, block, &old, image)?;
        page.write().copy_from_slice(image);
        Ok(())
    }

    // --- allocation graph ---

    pub fn read_graph(&self, file: &str) -> Result<AllocationGraph> {
        let page = self.pool.get_page(file, GRAPH_BLOCK)?;
        let graph = AllocationGraph::from_bytes(&page.read());
        graph
    }

    pub fn write_graph(&self, file: &str, graph: &AllocationGraph) -> Result<()> {
        self.write_block(file, GRAPH_BLOCK, &graph.to_bytes())
    }

    pub fn block_type(&self, file: &str, block: BlockId) -> Result<BlockType> {
        Ok(self.read_graph(file)?.get(block))
    }

    /// Lay out a new table file: header, graph and a few free blocks.
    /// The header block itself is written by the caller.
    pub fn create_file(&self, file: &str) -> Result<()> {
        let disk = self.pool.disk();
        disk.create(file)?;
        disk.grow_to(file, INITIAL_BLOCKS)?;
        self.write_graph(file, &AllocationGraph::new_table(self.max_blocks()))
    }

    /// Take the lowest free block, growing the file when none is free, and
    /// tag it `block_type`.
    pub fn allocate_block(&self, file: &str, block_type: BlockType) -> Result<BlockId> {
        if !block_type.is_in_use() {
            return Err(StorageError::InvalidArgument(format!(
                "cannot allocate a block as {:?}",
                block_type
            )));
        }
        let mut graph = self.read_graph(file)?;
        let block = match graph.first_free() {
            Some(block) => block,
            None => {
                let block = graph.first_unavailable().ok_or_else(|| {
                    StorageError::AllocationExhausted {
                        file: file.to_string(),
                        limit: graph.capacity(),
                    }
                })?;
                self.pool.disk().grow_to(file, block + 1)?;
                debug!(file, block, "grew table file");
                block
            }
        };
        graph.set(block, block_type)?;
        self.write_graph(file, &graph)?;
        Ok(block)
    }

    /// Return a block to the free pool
    pub fn free_block(&self, file: &str, block: BlockId) -> Result<()> {
        if block == HEADER_BLOCK || block == GRAPH_BLOCK {
            return Err(StorageError::InvalidArgument(format!(
                "block {} cannot be freed",
                block
            )));
        }
        let mut graph = self.read_graph(file)?;
        if !graph.get(block).is_in_use() {
            return Err(StorageError::Corruption(format!(
                "freeing block {} of '{}' tagged {:?}",
                block,
                file,
                graph.get(block)
            )));
        }
        graph.set(block, BlockType::Free)?;
        self.write_graph(file, &graph)
    }

    /// Log the old image as a Delete record, then free the block
    pub fn release_block(&self, file: &str, block: BlockId) -> Result<()> {
        let old = self.read_block(file, block)?;
        self.wal.log_delete(self.current_txn(), file, block, &old)?;
        self.free_block(file, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WALConfig;
    use crate::storage::DiskManager;
    use crate::txn::LogType;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> BlockStore {
        let disk = Arc::new(DiskManager::new(temp_dir.path(), 512).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 16));
        let wal = Arc::new(
            WalManager::open(temp_dir.path().join("db.wal"), WALConfig::for_testing()).unwrap(),
        );
        BlockStore::new(pool, wal)
    }

    #[test]
    fn test_new_file_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.create_file("t").unwrap();

        let graph = store.read_graph("t").unwrap();
        assert_eq!(graph.capacity(), 512);
        assert_eq!(graph.get(0), BlockType::TableHeader);
        assert_eq!(graph.get(1), BlockType::AllocationGraph);
        assert_eq!(graph.count(BlockType::Free), 4);
        assert_eq!(graph.get(6), BlockType::Unavailable);
        assert_eq!(store.pool().disk().block_count("t").unwrap(), INITIAL_BLOCKS);
    }

    #[test]
    fn test_allocate_reuses_then_grows() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.create_file("t").unwrap();

        let blocks: Vec<_> = (0..4)
            .map(|_| store.allocate_block("t", BlockType::Leaf).unwrap())
            .collect();
        assert_eq!(blocks, vec![2, 3, 4, 5]);

        // File grows by one block
        assert_eq!(store.allocate_block("t", BlockType::Record).unwrap(), 6);
        assert_eq!(store.pool().disk().block_count("t").unwrap(), 7);

        store.free_block("t", 3).unwrap();
        assert_eq!(store.block_type("t", 3).unwrap(), BlockType::Free);
        assert_eq!(store.allocate_block("t", BlockType::Internal).unwrap(), 3);
        assert_eq!(store.block_type("t", 3).unwrap(), BlockType::Internal);
    }

    #[test]
    fn test_allocation_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.create_file("t").unwrap();
        for _ in 2..512 {
            store.allocate_block("t", BlockType::Record).unwrap();
        }
        let err = store.allocate_block("t", BlockType::Record).unwrap_err();
        assert!(matches!(err, StorageError::AllocationExhausted { limit: 512, .. }));
    }

    #[test]
    fn test_free_rules() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.create_file("t").unwrap();
        assert!(store.free_block("t", HEADER_BLOCK).is_err());
        assert!(store.free_block("t", GRAPH_BLOCK).is_err());
        // Already free
        assert!(matches!(store.free_block("t", 2), Err(StorageError::Corruption(_))));
        assert!(store.allocate_block("t", BlockType::Free).is_err());
    }

    #[test]
    fn test_writes_are_logged_before_dirty() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.create_file("t").unwrap();
        store.begin().unwrap();
        let block = store.allocate_block("t", BlockType::Record).unwrap();
        store.write_block("t", block, &[7u8; 512]).unwrap();
        store.update_block("t", block, &[8u8; 512]).unwrap();
        store.release_block("t", block).unwrap();
        store.commit().unwrap();

        assert_eq!(store.pool().is_dirty("t", block), Some(true));
        assert_eq!(store.pool().pin_count("t", block), Some(0));

        let records = store.wal().read_records().unwrap();
        let types: Vec<_> = records.iter().map(|r| r.log_type).collect();
        assert_eq!(
            types,
            vec![
                LogType::Insert, // graph at create
                LogType::Begin,
                LogType::Insert, // graph
                LogType::Insert, // record
                LogType::Update, // record
                LogType::Delete, // record old image
                LogType::Insert, // graph
                LogType::Commit,
            ]
        );
        let update = &records[4];
        assert_eq!(&update.payload[..512], &[7u8; 512][..]);
        assert_eq!(update.redo_image().unwrap(), &[8u8; 512][..]);
        assert_eq!(update.txn_id, records[1].txn_id);
        assert_eq!(records[0].txn_id, 0);
    }

    #[test]
    fn test_graph_rejects_unknown_tags() {
        let mut bytes = AllocationGraph::new_table(64).to_bytes();
        bytes[10] = 99;
        assert!(AllocationGraph::from_bytes(&bytes).is_err());
        assert!(AllocationGraph::from_bytes(&[0u8; 64]).is_err());
    }
}
