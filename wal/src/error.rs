//! Failure modes of the write-ahead buffer (spec §4.D).

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

use crate::backpressure::BackpressureSnapshot;

/// Errors from [`crate::Wal`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WalError {
    /// A caller waited longer than the configured timeout for buffer capacity to free up
    /// (spec §4.D "S4: backpressure timeout"), carrying the state snapshot at the time of expiry.
    #[snafu(display("timed out after {waited_ms}ms waiting for WAL backpressure to release"))]
    BackpressureTimeout {
        waited_ms: u64,
        snapshot: BackpressureSnapshot,
    },
    /// The underlying storage backend failed while flushing a segment.
    #[snafu(display("storage error flushing WAL segment: {source}"))]
    Storage { source: storage::StorageError },
    /// A WAL batch could not be decoded back from its stored JSON representation.
    #[snafu(display("corrupt WAL batch at {path}: {reason}"))]
    CorruptBatch { path: String, reason: String },
}

impl From<storage::StorageError> for WalError {
    fn from(source: storage::StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<WalError> for DbError {
    fn from(e: WalError) -> Self {
        let code = match &e {
            WalError::BackpressureTimeout { .. } => ErrorCode::Timeout,
            WalError::Storage { .. } => ErrorCode::StorageError,
            WalError::CorruptBatch { .. } => ErrorCode::StorageReadError,
        };
        DbError::new(code, e.to_string())
    }
}
