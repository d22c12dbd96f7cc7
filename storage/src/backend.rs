//! The [`StorageBackend`] trait: a pluggable key/blob store with atomic and conditional writes
//! (spec §4.A). Mirrors the shape of the real `object_store::ObjectStore` trait the teacher
//! depends on, narrowed to the operations the table log, WAL, and Parquet codec actually need.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Options accepted by [`StorageBackend::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// MIME type to record as object metadata, if the backend supports it.
    pub content_type: Option<String>,
    /// Arbitrary string metadata to store alongside the object.
    pub metadata: BTreeMap<String, String>,
    /// Succeed only if the object's current etag equals this value (optimistic concurrency).
    pub if_match: Option<String>,
    /// Succeed only if no object currently exists (`Some("*")`) or, symmetrically, only if one
    /// does (any other value is backend-defined and generally unsupported).
    pub if_none_match: Option<String>,
}

/// The outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// The etag assigned to the newly written object.
    pub etag: String,
    /// The size, in bytes, of the data written.
    pub size: u64,
}

/// Options narrowing a [`StorageBackend::list`] call.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// List only the immediate children of `prefix` (stop at the next `/`), like a directory
    /// listing, rather than every object below it.
    pub delimiter: bool,
    /// Maximum number of entries to return in one page.
    pub limit: Option<usize>,
    /// Opaque continuation cursor from a previous [`ListResult`].
    pub cursor: Option<String>,
    /// Only return paths whose final segment matches this glob-style suffix (e.g. `"*.json"`).
    pub pattern: Option<String>,
}

/// One page of a [`StorageBackend::list`] call.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Object paths found in this page.
    pub files: Vec<ObjectStat>,
    /// Common prefixes ("directories") found in this page, when `delimiter` was set.
    pub prefixes: Vec<String>,
    /// Cursor to pass to the next call to continue listing, if there is more.
    pub cursor: Option<String>,
    /// Whether further pages remain.
    pub has_more: bool,
}

/// Metadata about a single stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    /// The object's path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Current etag.
    pub etag: String,
    /// Last-modified time.
    pub modified: DateTime<Utc>,
    /// Stored metadata, if any.
    pub metadata: BTreeMap<String, String>,
}

/// A pluggable, namespace-scoped key/blob store (spec §4.A).
///
/// Implementations must provide read-after-write consistency for a single path and must make
/// [`Self::write_conditional`] atomic with respect to concurrent callers: at most one concurrent
/// conditional write against the same path and expected etag may succeed.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Reads the entire object at `path`.
    async fn read(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Reads a byte range `[start, end)` of the object at `path`.
    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes, StorageError>;

    /// Writes `data` to `path`, unconditionally overwriting any existing object.
    async fn write(
        &self,
        path: &str,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<WriteResult, StorageError>;

    /// Writes `data` to `path` only if no object currently exists there. Equivalent to
    /// `write` with `if_none_match: Some("*".into())`, but every backend must implement this
    /// without a separate stat round-trip where possible (spec §4.A "create-if-absent").
    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<WriteResult, StorageError>;

    /// Writes `data` to `path` only if the object's current etag equals `expected_etag`
    /// (`None` meaning "the object must not exist"). This is the primitive the table log's
    /// commit protocol and the WAL's OCC layer are built on (spec §4.C, §4.E).
    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, StorageError>;

    /// Appends `data` to the object at `path`, creating it if absent. Implemented as a bounded
    /// read-modify-write retry loop over [`Self::write_conditional`] (spec §4.A "append").
    async fn append(&self, path: &str, data: Bytes) -> Result<WriteResult, StorageError> {
        crate::retry::append_via_conditional_write(self, path, data).await
    }

    /// Deletes the object at `path`. Deleting an absent object is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Deletes every object whose path starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// Copies the object at `src` to `dst`, overwriting `dst` if present.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    /// Atomically renames `src` to `dst`. `dst` must not already exist.
    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Metadata for the object at `path`, without reading its body.
    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError>;

    /// Lists objects under `prefix`.
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListResult, StorageError>;

    /// Creates `path` as an (implementation-defined) directory marker. A no-op for backends with
    /// no directory concept (e.g. object stores), where any key prefix is implicitly a
    /// "directory".
    async fn mkdir(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    /// Removes the directory at `path`. If `recursive` is false, fails with
    /// [`StorageError::DirectoryNotEmpty`] unless it is empty.
    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        if recursive {
            self.delete_prefix(path).await?;
            Ok(())
        } else {
            let listing = self
                .list(path, ListOptions { limit: Some(1), ..Default::default() })
                .await?;
            if listing.files.is_empty() && listing.prefixes.is_empty() {
                Ok(())
            } else {
                Err(StorageError::DirectoryNotEmpty { path: path.to_string() })
            }
        }
    }
}
