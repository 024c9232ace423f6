//! Database Core - context object and startup
//!
//! A [`Database`] owns one data directory: the table files, the buffer pool
//! in front of them, and the write-ahead log `<name>.wal` with its
//! checkpoint side file. Opening a database runs crash recovery before any
//! table can be touched.

use super::persistence::CheckpointPolicy;
use super::table::{validate_table_name, OpenTables, Table};
use crate::cache::{BufferPool, BufferPoolStats};
use crate::config::DBConfig;
use crate::storage::{BlockStore, DiskManager};
use crate::txn::{RecoveryManager, RecoveryReport, WalManager};
use crate::types::TableSchema;
use crate::{Result, StorageError};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Handle to an open database directory
pub struct Database {
    pub(crate) dir: PathBuf,
    pub(crate) name: String,
    pub(crate) config: DBConfig,
    pub(crate) disk: Arc<DiskManager>,
    pub(crate) store: BlockStore,
    pub(crate) checkpoints: Arc<CheckpointPolicy>,
    open_tables: OpenTables,
    last_recovery: Option<RecoveryReport>,
    pub(crate) closed: bool,
}

impl Database {
    /// Open (or create) the database `name` in `dir` with default settings
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        Self::open_with_config(dir, name, DBConfig::default())
    }

    /// Open (or create) the database `name` in `dir`.
    ///
    /// # Process
    /// 1. Validate the configuration
    /// 2. Open the data directory and the WAL (cutting off a torn tail)
    /// 3. Replay every logged image past the last checkpoint, then truncate the log
    pub fn open_with_config<P: AsRef<Path>>(dir: P, name: &str, config: DBConfig) -> Result<Self> {
        config.validate()?;
        validate_table_name(name)
            .map_err(|_| StorageError::InvalidArgument(format!("invalid database name '{}'", name)))?;

        let dir = dir.as_ref().to_path_buf();
        let disk = Arc::new(DiskManager::new(&dir, config.block_size)?);
        let pool = Arc::new(BufferPool::new(Arc::clone(&disk), config.buffer_pool.capacity));
        let wal = Arc::new(WalManager::open(
            dir.join(format!("{}.wal", name)),
            config.wal.clone(),
        )?);

        let last_recovery = RecoveryManager::new(Arc::clone(&pool), Arc::clone(&wal)).recover()?;
        if let Some(report) = &last_recovery {
            info!(
                db = name,
                redo = report.redo_count,
                incomplete = report.incomplete_txns,
                "database recovered"
            );
        }

        let checkpoints = Arc::new(CheckpointPolicy::new(config.auto_checkpoint_interval));
        Ok(Self {
            dir,
            name: name.to_string(),
            store: BlockStore::new(pool, wal),
            disk,
            checkpoints,
            open_tables: Arc::new(Mutex::new(AHashSet::new())),
            last_recovery,
            config,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DBConfig {
        &self.config
    }

    /// Report of the recovery run at open, if the log was non-empty
    pub fn last_recovery(&self) -> Option<&RecoveryReport> {
        self.last_recovery.as_ref()
    }

    pub fn pool_stats(&self) -> BufferPoolStats {
        self.store.pool().stats()
    }

    /// Shared buffer pool, for callers that manage pages directly
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        self.store.pool()
    }

    /// Create a table using the configured B+Tree order
    pub fn create_table(&self, name: &str, schema: TableSchema) -> Result<Table> {
        self.create_table_with_order(name, schema, self.config.order)
    }

    pub fn create_table_with_order(&self, name: &str, schema: TableSchema, order: usize) -> Result<Table> {
        Table::create(
            self.store.clone(),
            name,
            schema,
            order,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.open_tables),
        )
    }

    /// Open an existing table. At most one handle per table may be live.
    pub fn open_table(&self, name: &str) -> Result<Table> {
        Table::open(
            self.store.clone(),
            name,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.open_tables),
        )
    }

    pub fn has_table(&self, name: &str) -> bool {
        validate_table_name(name).is_ok() && self.disk.exists(name)
    }

    /// Names of all tables in the directory, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.disk.list_files()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(db = %self.name, error = %e, "failed to flush database on drop");
        }
    }
}
