//! Read-modify-write retry loop backing [`crate::StorageBackend::append`].

use bytes::{Bytes, BytesMut};

use crate::backend::{StorageBackend, WriteResult};
use crate::error::StorageError;

/// Bound on read-modify-write attempts before giving up with a conflict error (spec §4.A
/// "append must not retry forever").
pub const MAX_RETRIES: u32 = 10;

pub(crate) async fn append_via_conditional_write<B: StorageBackend + ?Sized>(
    backend: &B,
    path: &str,
    data: Bytes,
) -> Result<WriteResult, StorageError> {
    for _ in 0..MAX_RETRIES {
        match backend.stat(path).await {
            Ok(stat) => {
                let existing = backend.read(path).await?;
                let mut combined = BytesMut::with_capacity(existing.len() + data.len());
                combined.extend_from_slice(&existing);
                combined.extend_from_slice(&data);
                match backend
                    .write_conditional(path, combined.freeze(), Some(&stat.etag))
                    .await
                {
                    Ok(result) => return Ok(result),
                    Err(StorageError::VersionMismatch { .. }) => continue,
                    Err(other) => return Err(other),
                }
            }
            Err(StorageError::FileNotFound { .. }) => {
                match backend.write_conditional(path, data.clone(), None).await {
                    Ok(result) => return Ok(result),
                    Err(StorageError::FileExists { .. } | StorageError::VersionMismatch { .. }) => {
                        continue
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(StorageError::retries_exhausted(path))
}
