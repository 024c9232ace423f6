//! Write-Ahead Logging
//!
//! The log holds physical block images and transaction markers. Every page
//! mutation is appended (and flushed per [`crate::config::DurabilityLevel`]) before the page
//! is marked dirty in the buffer pool, so no block reaches disk ahead of its
//! log record.
//!
//! ## File format
//! A sequence of checksummed frames (see [`Checksum::encode_frame`]), each
//! holding one bincode-encoded [`LogRecord`]. A short or corrupt frame at the
//! tail is a torn append: the scan stops there and the tail is cut off.
//!
//! ## Checkpoint side file
//! `<log>.ckpt` holds the LSN of the last checkpoint as a single text line.

use crate::cache::BufferPool;
use crate::config::WALConfig;
use crate::storage::checksum::Checksum;
use crate::storage::BlockId;
use crate::{Result, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Log sequence number (monotonically increasing, first record is 1)
pub type LogSequenceNumber = u64;

/// Transaction id
pub type TxnId = u32;

/// Returned by appends suppressed during recovery
pub const INVALID_LSN: LogSequenceNumber = 0;

/// Record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    Delete = 5,
    Update = 6,
    Checkpoint = 7,
}

/// One WAL record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: LogSequenceNumber,
    pub txn_id: TxnId,
    pub log_type: LogType,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Table (file) the record applies to; empty for markers
    pub table: String,
    pub block: BlockId,
    pub payload_size: u32,
    /// Insert: new image. Delete: old image. Update: old image then new image.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Whether recovery replays this record
    pub fn is_redoable(&self) -> bool {
        matches!(self.log_type, LogType::Insert | LogType::Update)
    }

    /// Block image to install during redo
    pub fn redo_image(&self) -> Option<&[u8]> {
        match self.log_type {
            LogType::Insert => Some(&self.payload),
            LogType::Update => Some(&self.payload[self.payload.len() / 2..]),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.payload_size as usize != self.payload.len() {
            return Err(StorageError::Corruption(format!(
                "LSN {}: payload_size {} but {} payload bytes",
                self.lsn,
                self.payload_size,
                self.payload.len()
            )));
        }
        if self.log_type == LogType::Update && self.payload.len() % 2 != 0 {
            return Err(StorageError::Corruption(format!(
                "LSN {}: update payload of odd length {}",
                self.lsn,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

struct WalState {
    file: File,
    next_lsn: LogSequenceNumber,
    next_txn: TxnId,
    last_checkpoint: LogSequenceNumber,
}

pub struct WalManager {
    path: PathBuf,
    checkpoint_path: PathBuf,
    config: WALConfig,
    state: Mutex<WalState>,
    /// Appends are suppressed while redo is running
    recovering: AtomicBool,
}

/// Result of scanning the log file
struct Scan {
    records: Vec<LogRecord>,
    /// Byte length of the valid prefix
    valid_len: u64,
    torn: bool,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn scan_file(path: &Path) -> Result<Scan> {
    let mut scan = Scan {
        records: Vec::new(),
        valid_len: 0,
        torn: false,
    };
    if !path.exists() {
        return Ok(scan);
    }
    let mut reader = BufReader::new(File::open(path)?);
    loop {
        let frame = match Checksum::read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %path.display(), offset = scan.valid_len, error = %e, "torn WAL tail");
                scan.torn = true;
                break;
            }
        };
        let frame_len = frame.len() as u64 + 8;
        let record: LogRecord = match bincode::deserialize(&frame) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), offset = scan.valid_len, error = %e, "undecodable WAL frame");
                scan.torn = true;
                break;
            }
        };
        if let Err(e) = record.validate() {
            warn!(error = %e, "invalid WAL record");
            scan.torn = true;
            break;
        }
        scan.valid_len += frame_len;
        scan.records.push(record);
    }
    Ok(scan)
}

impl WalManager {
    /// Open (or create) the log at `path`.
    ///
    /// A torn tail left by a crash is cut off so new appends stay readable.
    /// The next LSN continues above both the log and the checkpoint file.
    pub fn open<P: AsRef<Path>>(path: P, config: WALConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut checkpoint_path = path.clone().into_os_string();
        checkpoint_path.push(".ckpt");
        let checkpoint_path = PathBuf::from(checkpoint_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let scan = scan_file(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        if scan.torn {
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        let last_checkpoint = read_checkpoint_file(&checkpoint_path)?;
        let max_lsn = scan.records.iter().map(|r| r.lsn).max().unwrap_or(0);
        let max_txn = scan.records.iter().map(|r| r.txn_id).max().unwrap_or(0);
        debug!(
            path = %path.display(),
            records = scan.records.len(),
            max_lsn,
            last_checkpoint,
            "opened WAL"
        );

        Ok(Self {
            path,
            checkpoint_path,
            config,
            state: Mutex::new(WalState {
                file,
                next_lsn: max_lsn.max(last_checkpoint) + 1,
                next_txn: max_txn + 1,
                last_checkpoint,
            }),
            recovering: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Recovery is needed whenever the log holds anything
    pub fn needs_recovery(&self) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.file.metadata()?.len() > 0)
    }

    pub fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::SeqCst);
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    pub fn next_lsn(&self) -> LogSequenceNumber {
        self.state.lock().next_lsn
    }

    pub fn last_checkpoint_lsn(&self) -> LogSequenceNumber {
        self.state.lock().last_checkpoint
    }

    /// Append one record. Returns its LSN, or [`INVALID_LSN`] while recovering.
    pub fn append(
        &self,
        txn_id: TxnId,
        log_type: LogType,
        table: &str,
        block: BlockId,
        payload: Vec<u8>,
    ) -> Result<LogSequenceNumber> {
        if self.is_recovering() {
            return Ok(INVALID_LSN);
        }
        let mut state = self.state.lock();
        let lsn = state.next_lsn;
        let record = LogRecord {
            lsn,
            txn_id,
            log_type,
            timestamp: now_millis(),
            table: table.to_string(),
            block,
            payload_size: payload.len() as u32,
            payload,
        };
        let encoded = bincode::serialize(&record)?;
        let frame = Checksum::encode_frame(&encoded);

        state.file.write_all(&frame)?;
        state.file.flush()?;
        if self.config.durability_level.requires_immediate_sync() {
            state.file.sync_data()?;
        }
        state.next_lsn += 1;
        Ok(lsn)
    }

    /// Start an auto-commit transaction
    pub fn begin(&self) -> Result<TxnId> {
        let txn_id = {
            let mut state = self.state.lock();
            let txn_id = state.next_txn;
            state.next_txn = state.next_txn.wrapping_add(1).max(1);
            txn_id
        };
        self.append(txn_id, LogType::Begin, "", 0, Vec::new())?;
        Ok(txn_id)
    }

    pub fn commit(&self, txn_id: TxnId) -> Result<LogSequenceNumber> {
        self.append(txn_id, LogType::Commit, "", 0, Vec::new())
    }

    /// Record an abort. No undo is performed.
    pub fn abort(&self, txn_id: TxnId) -> Result<LogSequenceNumber> {
        self.append(txn_id, LogType::Abort, "", 0, Vec::new())
    }

    /// Log the full new image of a block
    pub fn log_insert(
        &self,
        txn_id: TxnId,
        table: &str,
        block: BlockId,
        image: &[u8],
    ) -> Result<LogSequenceNumber> {
        self.append(txn_id, LogType::Insert, table, block, image.to_vec())
    }

    /// Log the image of a block being released
    pub fn log_delete(
        &self,
        txn_id: TxnId,
        table: &str,
        block: BlockId,
        old_image: &[u8],
    ) -> Result<LogSequenceNumber> {
        self.append(txn_id, LogType::Delete, table, block, old_image.to_vec())
    }

    /// Log old and new images of a block
    pub fn log_update(
        &self,
        txn_id: TxnId,
        table: &str,
        block: BlockId,
        old_image: &[u8],
        new_image: &[u8],
    ) -> Result<LogSequenceNumber> {
        if old_image.len() != new_image.len() {
            return Err(StorageError::InvalidArgument(format!(
                "update images differ in size: {} vs {}",
                old_image.len(),
                new_image.len()
            )));
        }
        let mut payload = Vec::with_capacity(old_image.len() * 2);
        payload.extend_from_slice(old_image);
        payload.extend_from_slice(new_image);
        self.append(txn_id, LogType::Update, table, block, payload)
    }

    /// Flush every dirty page, append a checkpoint record and persist its LSN.
    pub fn checkpoint(&self, pool: &BufferPool) -> Result<LogSequenceNumber> {
        let flushed = pool.flush_all_pages()?;
        let lsn = self.append(0, LogType::Checkpoint, "", 0, Vec::new())?;
        if lsn == INVALID_LSN {
            return Ok(lsn);
        }
        write_checkpoint_file(&self.checkpoint_path, lsn)?;
        self.state.lock().last_checkpoint = lsn;
        if self.config.truncate_on_checkpoint {
            self.truncate()?;
        }
        info!(lsn, flushed, "checkpoint complete");
        Ok(lsn)
    }

    /// LSN stored in the checkpoint side file (0 if none)
    pub fn checkpoint_lsn(&self) -> Result<LogSequenceNumber> {
        read_checkpoint_file(&self.checkpoint_path)
    }

    /// Read every intact record from the start of the log
    pub fn read_records(&self) -> Result<Vec<LogRecord>> {
        let _state = self.state.lock();
        Ok(scan_file(&self.path)?.records)
    }

    /// Empty the log. LSNs keep counting up.
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.set_len(0)?;
        state.file.seek(SeekFrom::Start(0))?;
        state.file.sync_all()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }
}

fn read_checkpoint_file(path: &Path) -> Result<LogSequenceNumber> {
    if !path.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    match text.trim().parse() {
        Ok(lsn) => Ok(lsn),
        Err(_) => {
            warn!(path = %path.display(), "unreadable checkpoint file, replaying whole log");
            Ok(0)
        }
    }
}

fn write_checkpoint_file(path: &Path, lsn: LogSequenceNumber) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{}", lsn)?;
    file.sync_all()?;
    Ok(())
}
