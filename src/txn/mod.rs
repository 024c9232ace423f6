//! Write-ahead logging and crash recovery

pub mod recovery;
pub mod wal;

pub use recovery::{AnalysisResult, RecoveryManager, RecoveryReport};
pub use wal::{LogRecord, LogSequenceNumber, LogType, TxnId, WalManager, INVALID_LSN};
