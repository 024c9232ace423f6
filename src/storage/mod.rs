//! Storage layer: raw block files, allocation graph and checksummed frames

pub mod block_store;
pub mod checksum;
pub mod disk;

/// Index of a block inside a table file
pub type BlockId = u64;

pub use block_store::{AllocationGraph, BlockStore, BlockType, GRAPH_BLOCK, HEADER_BLOCK};
pub use checksum::{Checksum, ChecksumError};
pub use disk::DiskManager;
