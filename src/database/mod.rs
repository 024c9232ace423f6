//! Database Module
//!
//! # Module Structure
//! - `core`: [`Database`] context object, open with recovery, table catalog
//! - `table`: [`Table`] handle, table header and row-level operations
//! - `persistence`: checkpoints and shutdown

pub mod core;
pub mod persistence;
pub mod table;

pub use core::Database;
pub use table::{Table, TableHeader};
