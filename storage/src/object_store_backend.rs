//! Adapter from [`StorageBackend`] onto the real `object_store` crate (spec §4.A "backends:
//! ... | object_store"), so this crate can run against S3, GCS, Azure, or any other
//! `object_store::ObjectStore` implementation the host application wires up.
//!
//! Conditional writes use `object_store`'s native `put_opts` with `PutMode::Create` /
//! `PutMode::Update(UpdateVersion)`, giving the same atomicity guarantee a cloud object store's
//! compare-and-swap API provides — the same primitive the teacher's catalog and Parquet cache
//! layers build their own consistency on top of.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjPath;
use object_store::{
    Attribute, Attributes, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion,
};

use crate::backend::{ListOptions, ListResult, ObjectStat, StorageBackend, WriteOptions, WriteResult};
use crate::error::StorageError;
use crate::path::validate_path;

/// Wraps any `object_store::ObjectStore` implementation as a [`StorageBackend`].
#[derive(Debug)]
pub struct ObjectStoreBackend<T: ObjectStore> {
    inner: Arc<T>,
}

impl<T: ObjectStore> ObjectStoreBackend<T> {
    /// Wraps `store`.
    pub fn new(store: Arc<T>) -> Self {
        Self { inner: store }
    }

    fn obj_path(path: &str) -> Result<ObjPath, StorageError> {
        ObjPath::parse(path).map_err(|e| StorageError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn map_err(path: &str, err: object_store::Error) -> StorageError {
        match &err {
            object_store::Error::NotFound { .. } => StorageError::FileNotFound { path: path.to_string() },
            object_store::Error::AlreadyExists { .. } => StorageError::FileExists { path: path.to_string() },
            object_store::Error::Precondition { .. } | object_store::Error::NotModified { .. } => {
                StorageError::VersionMismatch {
                    path: path.to_string(),
                    expected: None,
                    actual: None,
                }
            }
            _ => StorageError::ObjectStore { source: err },
        }
    }
}

#[async_trait]
impl<T: ObjectStore> StorageBackend for ObjectStoreBackend<T> {
    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = validate_path(path)?;
        let obj_path = Self::obj_path(path)?;
        let result = self
            .inner
            .get(&obj_path)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        result.bytes().await.map_err(|e| Self::map_err(path, e))
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes, StorageError> {
        let validated = validate_path(path)?;
        let obj_path = Self::obj_path(validated)?;
        self.inner
            .get_range(&obj_path, start..end)
            .await
            .map_err(|e| Self::map_err(validated, e))
    }

    async fn write(
        &self,
        path: &str,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<WriteResult, StorageError> {
        let path = validate_path(path)?;
        if options.if_none_match.as_deref() == Some("*") {
            return self.write_conditional(path, data, None).await;
        }
        if let Some(expected) = &options.if_match {
            return self.write_conditional(path, data, Some(expected)).await;
        }
        let obj_path = Self::obj_path(path)?;
        let mut attributes = Attributes::new();
        if let Some(content_type) = &options.content_type {
            attributes.insert(Attribute::ContentType, content_type.clone().into());
        }
        let put_options = PutOptions {
            mode: PutMode::Overwrite,
            attributes,
            ..Default::default()
        };
        let size = data.len() as u64;
        let result = self
            .inner
            .put_opts(&obj_path, PutPayload::from_bytes(data), put_options)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(WriteResult {
            etag: result.e_tag.unwrap_or_default(),
            size,
        })
    }

    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        _options: WriteOptions,
    ) -> Result<WriteResult, StorageError> {
        self.write_conditional(path, data, None).await
    }

    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, StorageError> {
        let path = validate_path(path)?;
        let obj_path = Self::obj_path(path)?;
        let mode = match expected_etag {
            None => PutMode::Create,
            Some(etag) => PutMode::Update(UpdateVersion {
                e_tag: Some(etag.to_string()),
                version: None,
            }),
        };
        let size = data.len() as u64;
        let result = self
            .inner
            .put_opts(
                &obj_path,
                PutPayload::from_bytes(data),
                PutOptions { mode, ..Default::default() },
            )
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(WriteResult {
            etag: result.e_tag.unwrap_or_default(),
            size,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = validate_path(path)?;
        let obj_path = Self::obj_path(path)?;
        match self.inner.delete(&obj_path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Self::map_err(path, e)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        use futures::TryStreamExt;
        let obj_prefix = Self::obj_path(prefix)?;
        let mut count = 0u64;
        let mut stream = self.inner.list(Some(&obj_prefix));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| Self::map_err(prefix, e))?
        {
            self.inner
                .delete(&meta.location)
                .await
                .map_err(|e| Self::map_err(prefix, e))?;
            count += 1;
        }
        Ok(count)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src_p = validate_path(src)?;
        let dst_p = validate_path(dst)?;
        self.inner
            .copy(&Self::obj_path(src_p)?, &Self::obj_path(dst_p)?)
            .await
            .map_err(|e| Self::map_err(src_p, e))
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src_p = validate_path(src)?;
        let dst_p = validate_path(dst)?;
        self.inner
            .rename_if_not_exists(&Self::obj_path(src_p)?, &Self::obj_path(dst_p)?)
            .await
            .map_err(|e| Self::map_err(dst_p, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::FileNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        let path = validate_path(path)?;
        let obj_path = Self::obj_path(path)?;
        let meta = self
            .inner
            .head(&obj_path)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(ObjectStat {
            path: path.to_string(),
            size: meta.size,
            etag: meta.e_tag.unwrap_or_default(),
            modified: meta.last_modified,
            metadata: BTreeMap::new(),
        })
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListResult, StorageError> {
        use futures::TryStreamExt;
        let obj_prefix = Self::obj_path(prefix)?;
        let mut files = Vec::new();
        let mut prefixes = Vec::new();
        let mut has_more = false;
        if options.delimiter {
            // `list_with_delimiter` has no native offset primitive, so gather everything it
            // returns for this prefix and window it by cursor/limit the same way the other
            // backends do.
            let listing = self
                .inner
                .list_with_delimiter(Some(&obj_prefix))
                .await
                .map_err(|e| Self::map_err(prefix, e))?;
            prefixes = listing
                .common_prefixes
                .into_iter()
                .map(|p| p.to_string())
                .collect();
            let mut objects: Vec<_> = listing.objects.into_iter().collect();
            objects.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
            let start = match &options.cursor {
                Some(cursor) => {
                    objects.partition_point(|meta| meta.location.as_ref() <= cursor.as_str())
                }
                None => 0,
            };
            let remaining = &objects[start..];
            let window = match options.limit {
                Some(limit) if remaining.len() > limit => {
                    has_more = true;
                    &remaining[..limit]
                }
                _ => remaining,
            };
            for meta in window {
                files.push(ObjectStat {
                    path: meta.location.to_string(),
                    size: meta.size,
                    etag: meta.e_tag.clone().unwrap_or_default(),
                    modified: meta.last_modified,
                    metadata: BTreeMap::new(),
                });
            }
        } else {
            // `list_with_offset` lists entries lexicographically greater than `offset`, which is
            // exactly the "resume after last-key-seen" cursor this trait asks for.
            let mut stream = match &options.cursor {
                Some(cursor) => {
                    let offset = Self::obj_path(cursor)?;
                    self.inner.list_with_offset(Some(&obj_prefix), &offset)
                }
                None => self.inner.list(Some(&obj_prefix)),
            };
            while let Some(meta) = stream
                .try_next()
                .await
                .map_err(|e| Self::map_err(prefix, e))?
            {
                if let Some(limit) = options.limit {
                    if files.len() >= limit {
                        has_more = true;
                        break;
                    }
                }
                files.push(ObjectStat {
                    path: meta.location.to_string(),
                    size: meta.size,
                    etag: meta.e_tag.unwrap_or_default(),
                    modified: meta.last_modified,
                    metadata: BTreeMap::new(),
                });
            }
        }
        let cursor = if has_more {
            files.last().map(|f| f.path.clone())
        } else {
            None
        };
        Ok(ListResult {
            files,
            prefixes,
            cursor,
            has_more,
        })
    }
}
