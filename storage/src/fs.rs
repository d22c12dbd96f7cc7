//! Filesystem-backed [`StorageBackend`] (spec §4.A "backends: memory | fs | object_store").
//!
//! Plain filesystems have no native etag/conditional-write primitive, so this backend keeps a
//! `<path>.etag` sidecar file next to each object and serializes every conditional write through
//! an in-process mutex — sufficient for a single-process embedded deployment, not for multiple
//! processes sharing one directory (use [`crate::ObjectStoreBackend`] for that).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::backend::{ListOptions, ListResult, ObjectStat, StorageBackend, WriteOptions, WriteResult};
use crate::error::StorageError;
use crate::path::validate_path;

/// A `StorageBackend` rooted at a directory on the local filesystem.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Opens (without creating) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn etag_sidecar(full_path: &Path) -> PathBuf {
        let mut sidecar = full_path.as_os_str().to_owned();
        sidecar.push(".etag");
        PathBuf::from(sidecar)
    }

    fn content_etag(data: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    async fn read_etag(full_path: &Path) -> Option<String> {
        tokio::fs::read_to_string(Self::etag_sidecar(full_path))
            .await
            .ok()
            .map(|s| s.trim().to_string())
    }

    async fn write_etag(full_path: &Path, etag: &str) -> std::io::Result<()> {
        tokio::fs::write(Self::etag_sidecar(full_path), etag).await
    }

    async fn current_etag(full_path: &Path) -> Option<String> {
        match Self::read_etag(full_path).await {
            Some(etag) => Some(etag),
            None => tokio::fs::read(full_path)
                .await
                .ok()
                .map(|data| Self::content_etag(&data)),
        }
    }

    fn map_io_err(path: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::FileNotFound { path: path.to_string() }
        } else {
            StorageError::Network { source: err }
        }
    }
}

#[async_trait]
impl StorageBackend for FsStore {
    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = validate_path(path)?;
        let full = self.full_path(path);
        let data = tokio::fs::read(&full)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes, StorageError> {
        let data = self.read(path).await?;
        let start = (start as usize).min(data.len());
        let end = (end as usize).min(data.len());
        Ok(data.slice(start.min(end)..end))
    }

    async fn write(
        &self,
        path: &str,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<WriteResult, StorageError> {
        let path = validate_path(path)?;
        let full = self.full_path(path);
        let _guard = self.write_lock.lock().await;
        if let Some(expected) = &options.if_match {
            let actual = Self::current_etag(&full).await;
            if actual.as_deref() != Some(expected.as_str()) {
                return Err(StorageError::VersionMismatch {
                    path: path.to_string(),
                    expected: Some(expected.clone()),
                    actual,
                });
            }
        }
        if options.if_none_match.as_deref() == Some("*") && full.exists() {
            return Err(StorageError::FileExists { path: path.to_string() });
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_err(path, e))?;
        }
        let size = data.len() as u64;
        tokio::fs::write(&full, &data)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        let etag = Self::content_etag(&data);
        Self::write_etag(&full, &etag)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        Ok(WriteResult { etag, size })
    }

    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        mut options: WriteOptions,
    ) -> Result<WriteResult, StorageError> {
        options.if_none_match = Some("*".to_string());
        self.write(path, data, options).await
    }

    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, StorageError> {
        let path = validate_path(path)?;
        let full = self.full_path(path);
        let _guard = self.write_lock.lock().await;
        let actual = Self::current_etag(&full).await;
        match (expected_etag, &actual) {
            (None, None) => {}
            (None, Some(_)) => return Err(StorageError::FileExists { path: path.to_string() }),
            (Some(expected), Some(current)) if expected == current => {}
            (Some(expected), actual) => {
                return Err(StorageError::VersionMismatch {
                    path: path.to_string(),
                    expected: Some(expected.to_string()),
                    actual: actual.clone(),
                })
            }
            (Some(_), None) => return Err(StorageError::FileNotFound { path: path.to_string() }),
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_err(path, e))?;
        }
        let size = data.len() as u64;
        let tmp = full.with_extension("tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        let etag = Self::content_etag(&data);
        Self::write_etag(&full, &etag)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        Ok(WriteResult { etag, size })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        let full = self.full_path(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Self::map_io_err(path, e)),
        }
        let _ = tokio::fs::remove_file(Self::etag_sidecar(&full)).await;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let listing = self
            .list(prefix, ListOptions { limit: None, ..Default::default() })
            .await?;
        let mut count = 0;
        for file in listing.files {
            self.delete(&file.path).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src_p = validate_path(src)?;
        let dst_p = validate_path(dst)?;
        let src_full = self.full_path(src_p);
        let dst_full = self.full_path(dst_p);
        if let Some(parent) = dst_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_err(dst_p, e))?;
        }
        tokio::fs::copy(&src_full, &dst_full)
            .await
            .map_err(|e| Self::map_io_err(src_p, e))?;
        if let Some(etag) = Self::read_etag(&src_full).await {
            let _ = Self::write_etag(&dst_full, &etag).await;
        }
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src_p = validate_path(src)?;
        let dst_p = validate_path(dst)?;
        let src_full = self.full_path(src_p);
        let dst_full = self.full_path(dst_p);
        if dst_full.exists() {
            return Err(StorageError::FileExists { path: dst_p.to_string() });
        }
        if let Some(parent) = dst_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_err(dst_p, e))?;
        }
        tokio::fs::rename(&src_full, &dst_full)
            .await
            .map_err(|e| Self::map_io_err(src_p, e))?;
        if let Some(etag) = Self::read_etag(&src_full).await {
            let _ = Self::write_etag(&dst_full, &etag).await;
            let _ = tokio::fs::remove_file(Self::etag_sidecar(&src_full)).await;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let path = validate_path(path)?;
        Ok(self.full_path(path).exists())
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        let path = validate_path(path)?;
        let full = self.full_path(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| Self::map_io_err(path, e))?;
        let etag = Self::current_etag(&full)
            .await
            .unwrap_or_else(|| "0".to_string());
        let modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
        Ok(ObjectStat {
            path: path.to_string(),
            size: meta.len(),
            etag,
            modified,
            metadata: Default::default(),
        })
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListResult, StorageError> {
        // The directory tree has no stable sort order on its own (the DFS stack is LIFO), so a
        // resumable cursor needs every matching relative path gathered and sorted first, then
        // windowed by cursor/limit — fine for the single-process scale this backend targets.
        let root = self.full_path(prefix);
        let mut rel_paths = Vec::new();
        let mut prefixes = std::collections::BTreeSet::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::map_io_err(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::map_io_err(prefix, e))?
            {
                let path = entry.path();
                let rel = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                if rel.ends_with(".etag") {
                    continue;
                }
                let file_type = entry.file_type().await.map_err(|e| Self::map_io_err(prefix, e))?;
                if file_type.is_dir() {
                    if options.delimiter {
                        prefixes.insert(format!("{rel}/"));
                    } else {
                        stack.push(path);
                    }
                    continue;
                }
                if let Some(pattern) = &options.pattern {
                    let suffix = pattern.trim_start_matches('*');
                    if !rel.ends_with(suffix) {
                        continue;
                    }
                }
                rel_paths.push(rel);
            }
        }
        rel_paths.sort();

        let start = match &options.cursor {
            Some(cursor) => rel_paths.partition_point(|p| p.as_str() <= cursor.as_str()),
            None => 0,
        };
        let remaining = &rel_paths[start..];
        let (window, has_more) = match options.limit {
            Some(limit) if remaining.len() > limit => (&remaining[..limit], true),
            _ => (remaining, false),
        };

        let mut files = Vec::with_capacity(window.len());
        for rel in window {
            files.push(self.stat(rel).await?);
        }
        let cursor = if has_more {
            window.last().cloned()
        } else {
            None
        };
        Ok(ListResult {
            files,
            prefixes: prefixes.into_iter().collect(),
            cursor,
            has_more,
        })
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        tokio::fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| Self::map_io_err(path, e))
    }
}
