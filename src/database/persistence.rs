//! Checkpoints and shutdown
//!
//! A checkpoint flushes every dirty page through the buffer pool, appends a
//! Checkpoint record and stores its LSN in the side file. Recovery never
//! replays anything at or below that LSN.

use super::core::Database;
use crate::storage::BlockStore;
use crate::txn::LogSequenceNumber;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Counts committed operations and checkpoints every `interval` of them
pub(crate) struct CheckpointPolicy {
    interval: Option<u64>,
    ops: AtomicU64,
}

impl CheckpointPolicy {
    pub(crate) fn new(interval: Option<u64>) -> Self {
        Self {
            interval,
            ops: AtomicU64::new(0),
        }
    }

    /// Note one committed operation, checkpointing when the interval is hit.
    ///
    /// The operation is durable in the log either way, so a failed
    /// checkpoint is only logged; the next one (or `close`) retries it.
    /// Returns the LSN of a checkpoint taken here.
    pub(crate) fn record_op(&self, store: &BlockStore) -> Option<LogSequenceNumber> {
        let interval = self.interval?;
        let ops = self.ops.fetch_add(1, Ordering::SeqCst) + 1;
        if ops % interval != 0 {
            return None;
        }
        match store.wal().checkpoint(store.pool()) {
            Ok(lsn) => {
                debug!(ops, lsn, "automatic checkpoint");
                Some(lsn)
            }
            Err(e) => {
                warn!(ops, error = %e, "automatic checkpoint failed");
                None
            }
        }
    }

    pub(crate) fn ops(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }
}

impl Database {
    /// Flush all dirty pages and record a checkpoint. Returns its LSN.
    pub fn checkpoint(&self) -> Result<LogSequenceNumber> {
        self.store.wal().checkpoint(self.store.pool())
    }

    /// Checkpoint, sync every file and close the database.
    ///
    /// Dropping a [`Database`] does the same on a best-effort basis; `close`
    /// reports failures instead of logging them.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let lsn = self.checkpoint()?;
        self.disk.sync_all()?;
        self.store.wal().sync()?;
        info!(db = %self.name, lsn, ops = self.checkpoints.ops(), "database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferPool;
    use crate::config::WALConfig;
    use crate::storage::DiskManager;
    use crate::txn::{LogType, WalManager};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> BlockStore {
        let disk = Arc::new(DiskManager::new(temp_dir.path(), 512).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 8));
        let wal = Arc::new(
            WalManager::open(temp_dir.path().join("db.wal"), WALConfig::for_testing()).unwrap(),
        );
        BlockStore::new(pool, wal)
    }

    fn checkpoints_logged(store: &BlockStore) -> usize {
        store
            .wal()
            .read_records()
            .unwrap()
            .iter()
            .filter(|r| r.log_type == LogType::Checkpoint)
            .count()
    }

    #[test]
    fn test_interval_checkpoints() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let policy = CheckpointPolicy::new(Some(3));

        let taken: Vec<_> = (0..7).filter_map(|_| policy.record_op(&store)).collect();
        assert_eq!(taken.len(), 2);
        assert_eq!(policy.ops(), 7);
        assert_eq!(checkpoints_logged(&store), 2);
        assert!(store.wal().checkpoint_lsn().unwrap() > 0);
    }

    #[test]
    fn test_manual_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let policy = CheckpointPolicy::new(None);

        for _ in 0..10 {
            assert!(policy.record_op(&store).is_none());
        }
        assert_eq!(checkpoints_logged(&store), 0);
        assert_eq!(store.wal().checkpoint_lsn().unwrap(), 0);
    }

    #[test]
    fn test_failed_checkpoint_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let policy = CheckpointPolicy::new(Some(2));

        // The side file cannot be created over a directory.
        let side_file = store.wal().checkpoint_path().to_path_buf();
        std::fs::create_dir(&side_file).unwrap();
        assert!(policy.record_op(&store).is_none());
        assert!(policy.record_op(&store).is_none());
        assert_eq!(policy.ops(), 2);

        std::fs::remove_dir(&side_file).unwrap();
        assert!(policy.record_op(&store).is_none());
        let lsn = policy.record_op(&store).unwrap();
        assert_eq!(store.wal().checkpoint_lsn().unwrap(), lsn);
    }
}
