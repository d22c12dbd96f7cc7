//! In-process [`StorageBackend`], used by unit tests and by embedded deployments with no
//! durability requirement (spec §4.A "backends: memory | fs | object_store").

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::backend::{ListOptions, ListResult, ObjectStat, StorageBackend, WriteOptions, WriteResult};
use crate::error::StorageError;
use crate::path::validate_path;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    modified: chrono::DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

/// A `StorageBackend` backed by a `BTreeMap` guarded by a single mutex, giving every conditional
/// write true atomicity within one process. Intended for tests and ephemeral/in-memory databases,
/// not for multi-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn new_etag() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = validate_path(path)?;
        let objects = self.objects.lock().unwrap();
        objects
            .get(path)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::FileNotFound { path: path.to_string() })
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes, StorageError> {
        let data = self.read(path).await?;
        let start = start as usize;
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
        let mut objects = self.objects.lock().unwrap();
        if let Some(expected) = &options.if_match {
            let actual = objects.get(path).map(|o| o.etag.clone());
            if actual.as_deref() != Some(expected.as_str()) {
                return Err(StorageError::VersionMismatch {
                    path: path.to_string(),
                    expected: Some(expected.clone()),
                    actual,
                });
            }
        }
        if options.if_none_match.as_deref() == Some("*") && objects.contains_key(path) {
            return Err(StorageError::FileExists { path: path.to_string() });
        }
        let etag = Self::new_etag();
        let size = data.len() as u64;
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                modified: Utc::now(),
                metadata: options.metadata,
            },
        );
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
        let mut objects = self.objects.lock().unwrap();
        let actual = objects.get(path).map(|o| o.etag.clone());
        match (expected_etag, &actual) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(StorageError::FileExists { path: path.to_string() })
            }
            (Some(expected), Some(current)) if expected == current => {}
            (Some(expected), actual) => {
                return Err(StorageError::VersionMismatch {
                    path: path.to_string(),
                    expected: Some(expected.to_string()),
                    actual: actual.clone(),
                })
            }
            (Some(_), None) => {
                return Err(StorageError::FileNotFound { path: path.to_string() })
            }
        }
        let etag = Self::new_etag();
        let size = data.len() as u64;
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                modified: Utc::now(),
                metadata: BTreeMap::new(),
            },
        );
        Ok(WriteResult { etag, size })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut objects = self.objects.lock().unwrap();
        let keys: Vec<String> = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            objects.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src = validate_path(src)?;
        let dst = validate_path(dst)?.to_string();
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get(src)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound { path: src.to_string() })?;
        objects.insert(dst, obj);
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src = validate_path(src)?;
        let dst = validate_path(dst)?.to_string();
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&dst) {
            return Err(StorageError::FileExists { path: dst });
        }
        let obj = objects
            .remove(src)
            .ok_or_else(|| StorageError::FileNotFound { path: src.to_string() })?;
        objects.insert(dst, obj);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let path = validate_path(path)?;
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        let path = validate_path(path)?;
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(path)
            .ok_or_else(|| StorageError::FileNotFound { path: path.to_string() })?;
        Ok(ObjectStat {
            path: path.to_string(),
            size: obj.data.len() as u64,
            etag: obj.etag.clone(),
            modified: obj.modified,
            metadata: obj.metadata.clone(),
        })
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListResult, StorageError> {
        use std::ops::Bound;

        let objects = self.objects.lock().unwrap();
        let mut files = Vec::new();
        let mut prefixes = std::collections::BTreeSet::new();
        let lower = match &options.cursor {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut has_more = false;
        let mut last_key: Option<String> = None;
        for (key, obj) in objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if options.delimiter {
                if let Some(slash) = rest.find('/') {
                    prefixes.insert(format!("{prefix}{}", &rest[..=slash]));
                    continue;
                }
            }
            if let Some(pattern) = &options.pattern {
                let suffix = pattern.trim_start_matches('*');
                if !key.ends_with(suffix) {
                    continue;
                }
            }
            if let Some(limit) = options.limit {
                if files.len() >= limit {
                    has_more = true;
                    break;
                }
            }
            files.push(ObjectStat {
                path: key.clone(),
                size: obj.data.len() as u64,
                etag: obj.etag.clone(),
                modified: obj.modified,
                metadata: obj.metadata.clone(),
            });
            last_key = Some(key.clone());
        }
        let cursor = if has_more { last_key } else { None };
        Ok(ListResult {
            files,
            prefixes: prefixes.into_iter().collect(),
            cursor,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        store
            .write("a/b.json", Bytes::from_static(b"hello"), WriteOptions::default())
            .await
            .unwrap();
        let data = store.read("a/b.json").await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn write_atomic_rejects_second_create() {
        let store = MemoryStore::new();
        store
            .write_atomic("x", Bytes::from_static(b"1"), WriteOptions::default())
            .await
            .unwrap();
        let err = store
            .write_atomic("x", Bytes::from_static(b"2"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FileExists { .. }));
    }

    #[tokio::test]
    async fn write_conditional_enforces_expected_etag() {
        let store = MemoryStore::new();
        let first = store
            .write_conditional("x", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        let err = store
            .write_conditional("x", Bytes::from_static(b"2"), Some("bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionMismatch { .. }));
        store
            .write_conditional("x", Bytes::from_static(b"2"), Some(&first.etag))
            .await
            .unwrap();
        assert_eq!(&store.read("x").await.unwrap()[..], b"2");
    }

    #[tokio::test]
    async fn append_concatenates_across_retries() {
        let store = MemoryStore::new();
        store.append("log", Bytes::from_static(b"a")).await.unwrap();
        store.append("log", Bytes::from_static(b"b")).await.unwrap();
        store.append("log", Bytes::from_static(b"c")).await.unwrap();
        assert_eq!(&store.read("log").await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn list_respects_delimiter_and_prefix() {
        let store = MemoryStore::new();
        for path in ["ns/a.json", "ns/b.json", "ns/sub/c.json", "other/d.json"] {
            store
                .write(path, Bytes::from_static(b"x"), WriteOptions::default())
                .await
                .unwrap();
        }
        let listing = store
            .list("ns/", ListOptions { delimiter: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.prefixes, vec!["ns/sub/".to_string()]);
    }

    #[tokio::test]
    async fn list_cursor_resumes_after_last_seen_key() {
        let store = MemoryStore::new();
        for path in ["ns/a", "ns/b", "ns/c", "ns/d"] {
            store.write(path, Bytes::new(), WriteOptions::default()).await.unwrap();
        }
        let first = store
            .list("ns/", ListOptions { limit: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(
            first.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            vec!["ns/a", "ns/b"]
        );
        assert!(first.has_more);
        let cursor = first.cursor.clone().unwrap();

        let second = store
            .list(
                "ns/",
                ListOptions { limit: Some(2), cursor: Some(cursor), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(
            second.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            vec!["ns/c", "ns/d"]
        );
        assert!(!second.has_more);
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn delete_prefix_removes_matching_keys_only() {
        let store = MemoryStore::new();
        store.write("a/1", Bytes::new(), WriteOptions::default()).await.unwrap();
        store.write("a/2", Bytes::new(), WriteOptions::default()).await.unwrap();
        store.write("b/1", Bytes::new(), WriteOptions::default()).await.unwrap();
        let removed = store.delete_prefix("a/").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.exists("b/1").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let store = MemoryStore::new();
        let err = store.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::PathTraversal { .. }));
    }
}
