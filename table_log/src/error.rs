//! Failure modes of the commit log (spec §4.C).

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

/// Errors from [`crate::TableLog`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableLogError {
    /// Every retry of a commit lost the race to a concurrent writer.
    #[snafu(display("commit to version {version} conflicted after {attempts} attempts"))]
    Conflict { version: u64, attempts: u32 },
    /// A commit or checkpoint file's JSON/Parquet bytes were malformed.
    #[snafu(display("corrupt log entry at {path}: {reason}"))]
    Corrupt { path: String, reason: String },
    /// The underlying storage backend failed.
    #[snafu(display("storage error: {source}"))]
    Storage { source: storage::StorageError },
    /// The Parquet codec failed while writing or reading a checkpoint.
    #[snafu(display("checkpoint codec error: {source}"))]
    Checkpoint { source: arrow::error::ArrowError },
    /// The underlying `parquet` crate failed while writing or reading a checkpoint.
    #[snafu(display("checkpoint parquet error: {source}"))]
    CheckpointParquet { source: parquet::errors::ParquetError },
}

impl From<storage::StorageError> for TableLogError {
    fn from(source: storage::StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<TableLogError> for DbError {
    fn from(e: TableLogError) -> Self {
        let code = match &e {
            TableLogError::Conflict { .. } => ErrorCode::VersionConflict,
            TableLogError::Corrupt { .. } => ErrorCode::StorageReadError,
            TableLogError::Storage { .. } => ErrorCode::StorageError,
            TableLogError::Checkpoint { .. } | TableLogError::CheckpointParquet { .. } => {
                ErrorCode::StorageError
            }
        };
        DbError::new(code, e.to_string())
    }
}
