//! Error types for the tinytable storage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The allocation graph of `file` cannot address another block.
    #[error("Allocation exhausted for '{file}': at most {limit} blocks are addressable")]
    AllocationExhausted { file: String, limit: usize },

    /// Every resident page is pinned; no eviction victim exists.
    #[error("Buffer pool exhausted: all {capacity} pages are pinned")]
    BufferPoolExhausted { capacity: usize },

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
