//! Database configuration and durability levels
//!
//! Every knob has a default matching a small embedded deployment:
//! 4 KiB blocks, order-2 B+Tree nodes, a 100-frame buffer pool and a
//! checkpoint every 100 logical operations.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// Smallest supported block size in bytes.
pub const MIN_BLOCK_SIZE: usize = 512;
/// Largest supported block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Durability level of WAL appends
///
/// - Synchronous: `sync_data` after every append (safe across power loss)
/// - NoSync: the append reaches the OS buffers only (safe across a process crash)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// Every append is followed by an fsync of the log file.
    Synchronous,

    /// Appends are handed to the OS without fsync. Only for tests and benchmarks.
    NoSync,
}

impl Default for DurabilityLevel {
    fn default() -> Self {
        DurabilityLevel::Synchronous
    }
}

impl DurabilityLevel {
    /// Whether each append must be fsynced before it returns
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }
}

/// WAL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WALConfig {
    pub durability_level: DurabilityLevel,

    /// Truncate the log once a checkpoint has flushed every dirty page.
    ///
    /// When false the log keeps growing and recovery skips everything at or
    /// below the checkpoint LSN.
    pub truncate_on_checkpoint: bool,
}

impl Default for WALConfig {
    fn default() -> Self {
        Self {
            durability_level: DurabilityLevel::default(),
            truncate_on_checkpoint: false,
        }
    }
}

impl WALConfig {
    /// Fastest configuration, for tests
    pub fn for_testing() -> Self {
        Self {
            durability_level: DurabilityLevel::NoSync,
            ..Default::default()
        }
    }
}

/// Buffer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of resident pages
    pub capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBConfig {
    /// Block size in bytes. Also bounds the number of blocks per table file,
    /// since the allocation graph spends one tag byte per block.
    pub block_size: usize,

    /// B+Tree order V: non-root nodes hold between V and 2V keys.
    pub order: usize,

    pub buffer_pool: BufferPoolConfig,

    pub wal: WALConfig,

    /// Take a checkpoint after this many logical operations (None = manual only)
    pub auto_checkpoint_interval: Option<u64>,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            order: 2,
            buffer_pool: BufferPoolConfig::default(),
            wal: WALConfig::default(),
            auto_checkpoint_interval: Some(100),
        }
    }
}

impl DBConfig {
    /// Test configuration: no fsync, manual checkpoints only
    pub fn for_testing() -> Self {
        Self {
            wal: WALConfig::for_testing(),
            auto_checkpoint_interval: None,
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.buffer_pool.capacity = capacity;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two()
            || self.block_size < MIN_BLOCK_SIZE
            || self.block_size > MAX_BLOCK_SIZE
        {
            return Err(StorageError::Config(format!(
                "block_size must be a power of two in [{}, {}], got {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.order == 0 {
            return Err(StorageError::Config("order must be at least 1".into()));
        }
        // A single tree operation pins at most a handful of pages at once.
        if self.buffer_pool.capacity < 4 {
            return Err(StorageError::Config(format!(
                "buffer pool capacity must be at least 4, got {}",
                self.buffer_pool.capacity
            )));
        }
        if self.auto_checkpoint_interval == Some(0) {
            return Err(StorageError::Config(
                "auto_checkpoint_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}
