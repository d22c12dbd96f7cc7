//! Failure modes of encoding/decoding entity and relationship files (spec §4.B).

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

/// Errors from [`crate::write_entities`], [`crate::read_entities`], and friends.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParquetFileError {
    /// The underlying `arrow`/`parquet` crate reported an error building or writing a batch.
    #[snafu(display("arrow/parquet encode error: {source}"))]
    Encode { source: arrow::error::ArrowError },
    /// The underlying `parquet` crate reported an error reading a file.
    #[snafu(display("parquet decode error: {source}"))]
    Decode { source: parquet::errors::ParquetError },
    /// A decoded row's `payload` column was not valid JSON.
    #[snafu(display("invalid payload JSON in row {row}: {source}"))]
    InvalidPayload {
        row: usize,
        source: serde_json::Error,
    },
    /// A required column was missing or had an unexpected Arrow type.
    #[snafu(display("column {column:?} missing or mistyped"))]
    MissingColumn { column: &'static str },
}

impl From<ParquetFileError> for DbError {
    fn from(e: ParquetFileError) -> Self {
        DbError::new(ErrorCode::StorageError, e.to_string())
    }
}
