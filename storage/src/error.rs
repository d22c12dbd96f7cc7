//! Storage failure taxonomy (spec §4.A "Failure kinds").

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

/// Errors a [`crate::StorageBackend`] implementation may return.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// No object exists at `path`.
    #[snafu(display("file not found: {path}"))]
    FileNotFound {
        /// The path that was looked up.
        path: String,
    },
    /// `if_none_match: "*"` (or `write_conditional` with `expected_etag: None`) was used but an
    /// object already exists at `path`.
    #[snafu(display("file already exists: {path}"))]
    FileExists {
        /// The path that already had an object.
        path: String,
    },
    /// `if_match`/`expected_etag` did not match the object's current etag.
    #[snafu(display("version mismatch at {path}: expected {expected:?}, found {actual:?}"))]
    VersionMismatch {
        /// The path being conditionally written.
        path: String,
        /// The etag the caller expected.
        expected: Option<String>,
        /// The etag actually stored, if any.
        actual: Option<String>,
    },
    /// `rmdir` without `recursive: true` was called on a non-empty directory.
    #[snafu(display("directory not empty: {path}"))]
    DirectoryNotEmpty {
        /// The directory path.
        path: String,
    },
    /// A backend-enforced storage quota was exceeded.
    #[snafu(display("quota exceeded writing {path}"))]
    QuotaExceeded {
        /// The path being written.
        path: String,
    },
    /// `path` was syntactically invalid (empty segment, control characters, etc.).
    #[snafu(display("invalid path {path:?}: {reason}"))]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
    /// `path` attempted to escape the store root via `..` or an absolute override.
    #[snafu(display("path traversal attempt: {path:?}"))]
    PathTraversal {
        /// The offending path.
        path: String,
    },
    /// The underlying transport failed.
    #[snafu(display("network error: {source}"))]
    Network {
        /// The underlying error.
        source: std::io::Error,
    },
    /// The underlying `object_store` crate returned an error.
    #[snafu(display("object_store error: {source}"))]
    ObjectStore {
        /// The underlying error.
        source: object_store::Error,
    },
}

impl StorageError {
    /// Exceeded [`crate::MAX_RETRIES`] attempting an [`crate::StorageBackend::append`]
    /// read-modify-write loop (spec §4.A).
    pub fn retries_exhausted(path: &str) -> Self {
        Self::VersionMismatch {
            path: path.to_string(),
            expected: None,
            actual: None,
        }
    }
}

impl From<StorageError> for DbError {
    fn from(e: StorageError) -> Self {
        let code = match &e {
            StorageError::FileNotFound { .. } => ErrorCode::FileNotFound,
            StorageError::FileExists { .. } => ErrorCode::AlreadyExists,
            StorageError::VersionMismatch { .. } => ErrorCode::EtagMismatch,
            StorageError::DirectoryNotEmpty { .. } => ErrorCode::StorageError,
            StorageError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            StorageError::InvalidPath { .. } => ErrorCode::InvalidPath,
            StorageError::PathTraversal { .. } => ErrorCode::PathTraversal,
            StorageError::Network { .. } => ErrorCode::NetworkError,
            StorageError::ObjectStore { .. } => ErrorCode::StorageError,
        };
        DbError::new(code, e.to_string())
    }
}
