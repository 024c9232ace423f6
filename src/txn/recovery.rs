//! Crash Recovery Manager
//!
//! Redo-only recovery in two phases:
//! 1. Analysis: scan the log, classify transactions, collect every
//!    Insert/Update record whose LSN is above the checkpoint LSN
//! 2. Redo: install each collected block image through the buffer pool
//!
//! Afterwards all touched pages are flushed and the log is truncated.
//! There is no undo pass: images of aborted or unfinished transactions are
//! replayed like any other.

use crate::cache::BufferPool;
use crate::storage::BlockId;
use crate::txn::wal::{LogRecord, LogSequenceNumber, LogType, TxnId, WalManager};
use crate::{Result, StorageError};
use ahash::AHashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Analysis phase result
#[derive(Debug, Default)]
pub struct AnalysisResult {
    /// LSN read from the checkpoint side file
    pub checkpoint_lsn: LogSequenceNumber,

    pub max_lsn: LogSequenceNumber,

    pub total_records: usize,

    pub committed_txns: AHashSet<TxnId>,

    pub aborted_txns: AHashSet<TxnId>,

    /// Transactions with a Begin but no Commit/Abort
    pub incomplete_txns: AHashSet<TxnId>,

    /// Records to replay, in log order
    pub redo_records: Vec<LogRecord>,
}

/// Recovery report
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub total_wal_records: usize,

    pub checkpoint_lsn: LogSequenceNumber,

    /// Block images installed
    pub redo_count: usize,

    /// Distinct pages touched by redo
    pub pages_touched: usize,

    pub committed_txns: usize,

    pub aborted_txns: usize,

    pub incomplete_txns: usize,

    pub recovery_time_ms: u64,
}

pub struct RecoveryManager {
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
}

impl RecoveryManager {
    pub fn new(pool: Arc<BufferPool>, wal: Arc<WalManager>) -> Self {
        Self { pool, wal }
    }

    pub fn needs_recovery(&self) -> Result<bool> {
        self.wal.needs_recovery()
    }

    /// Analysis phase: classify transactions and pick the records to redo
    pub fn analyze(&self) -> Result<AnalysisResult> {
        let checkpoint_lsn = self.wal.checkpoint_lsn()?;
        let records = self.wal.read_records()?;

        let mut analysis = AnalysisResult {
            checkpoint_lsn,
            total_records: records.len(),
            ..Default::default()
        };

        for record in records {
            analysis.max_lsn = analysis.max_lsn.max(record.lsn);
            match record.log_type {
                LogType::Begin => {
                    analysis.incomplete_txns.insert(record.txn_id);
                }
                LogType::Commit => {
                    analysis.incomplete_txns.remove(&record.txn_id);
                    analysis.committed_txns.insert(record.txn_id);
                }
                LogType::Abort => {
                    analysis.incomplete_txns.remove(&record.txn_id);
                    analysis.aborted_txns.insert(record.txn_id);
                }
                LogType::Insert | LogType::Update if record.lsn > checkpoint_lsn => {
                    analysis.redo_records.push(record);
                }
                LogType::Insert | LogType::Update | LogType::Delete | LogType::Checkpoint => {}
            }
        }

        Ok(analysis)
    }

    /// Redo phase: overwrite each target page with the logged image.
    ///
    /// Returns the number of distinct pages touched.
    pub fn redo(&self, analysis: &AnalysisResult) -> Result<usize> {
        let block_size = self.pool.block_size();
        let mut touched: AHashSet<(String, BlockId)> = AHashSet::new();

        for record in &analysis.redo_records {
            let Some(image) = record.redo_image() else {
                continue;
            };
            if image.len() != block_size {
                return Err(StorageError::Corruption(format!(
                    "LSN {}: image of {} bytes, block size is {}",
                    record.lsn,
                    image.len(),
                    block_size
                )));
            }
            let mut page = self.pool.get_page(&record.table, record.block)?;
            page.write().copy_from_slice(image);
            touched.insert((record.table.clone(), record.block));
        }

        Ok(touched.len())
    }

    /// Run recovery if the log is non-empty. Returns None when nothing was done.
    pub fn recover(&self) -> Result<Option<RecoveryReport>> {
        if !self.needs_recovery()? {
            return Ok(None);
        }
        self.wal.set_recovering(true);
        let result = self.run();
        self.wal.set_recovering(false);
        result.map(Some)
    }

    fn run(&self) -> Result<RecoveryReport> {
        let start = Instant::now();

        let analysis = self.analyze()?;
        debug!(
            records = analysis.total_records,
            checkpoint_lsn = analysis.checkpoint_lsn,
            redo = analysis.redo_records.len(),
            "recovery analysis done"
        );

        let pages_touched = self.redo(&analysis)?;

        self.pool.flush_all_pages()?;
        self.wal.truncate()?;

        let report = RecoveryReport {
            total_wal_records: analysis.total_records,
            checkpoint_lsn: analysis.checkpoint_lsn,
            redo_count: analysis.redo_records.len(),
            pages_touched,
            committed_txns: analysis.committed_txns.len(),
            aborted_txns: analysis.aborted_txns.len(),
            incomplete_txns: analysis.incomplete_txns.len(),
            recovery_time_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            records = report.total_wal_records,
            redo = report.redo_count,
            pages = report.pages_touched,
            incomplete = report.incomplete_txns,
            ms = report.recovery_time_ms,
            "recovery complete"
        );
        Ok(report)
    }
}
