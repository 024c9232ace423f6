//! Cache module - the page buffer pool

pub mod buffer_pool;

pub use buffer_pool::{BufferPool, BufferPoolStats, PageGuard, PageKey};
