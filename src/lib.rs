//! tinytable storage engine
//!
//! Embedded storage engine with one file per table.
//!
//! ## Architecture
//! - Storage layer: fixed-size blocks, a per-file allocation graph, logged block writes
//! - Cache layer: pin-counted LRU buffer pool with scoped page guards
//! - Index layer: disk B+Tree with a doubly linked leaf chain
//! - Transaction layer: redo-only write-ahead log, checkpoints, crash recovery
//! - Query layer: flat AND/OR predicate lists and assignments
//!
//! ## Example
//! ```ignore
//! use tinytable::{Attribute, DataType, Database, Predicate, TableSchema, Value};
//!
//! let db = Database::open("./data", "main")?;
//! let schema = TableSchema::new(vec![
//!     Attribute::new("id", DataType::Int).primary_key(),
//!     Attribute::new("name", DataType::Str(16)),
//! ])?;
//! let mut users = db.create_table("users", schema)?;
//! users.insert_row(vec![Value::Int(1), Value::from("ada")])?;
//! let rows = users.scan(&[Predicate::equals("name", "ada")], &[])?;
//! db.close()?;
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod index;
pub mod query;
pub mod storage;
pub mod txn;
pub mod types;

mod error;

pub use cache::{BufferPool, BufferPoolStats, PageGuard};
pub use config::{BufferPoolConfig, DBConfig, DurabilityLevel, WALConfig};
pub use database::{Database, Table, TableHeader};
pub use error::{Result, StorageError};
pub use index::{BPlusTree, TreeMeta, TreeStats};
pub use query::{Assignment, CompareOp, Logic, Predicate};
pub use storage::BlockId;
pub use txn::RecoveryReport;
pub use types::{Attribute, DataType, ForeignRef, Key, Row, TableSchema, Value};
