//! Path validation shared by every [`crate::StorageBackend`] (spec §4.A "Path rules").

use crate::error::{InvalidPathSnafu, PathTraversalSnafu, StorageError};
use snafu::ensure;

/// Rejects empty paths, absolute paths, and any `..` segment, returning the path unchanged on
/// success so callers can chain it: `let path = validate_path(path)?;`
pub fn validate_path(path: &str) -> Result<&str, StorageError> {
    ensure!(
        !path.is_empty(),
        InvalidPathSnafu {
            path: path.to_string(),
            reason: "path must not be empty",
        }
    );
    ensure!(
        !path.starts_with('/'),
        InvalidPathSnafu {
            path: path.to_string(),
            reason: "path must be relative to the store root",
        }
    );
    for segment in path.split('/') {
        ensure!(
            segment != "..",
            PathTraversalSnafu {
                path: path.to_string(),
            }
        );
        ensure!(
            !segment.is_empty(),
            InvalidPathSnafu {
                path: path.to_string(),
                reason: "path must not contain empty segments",
            }
        );
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_relative_paths() {
        assert!(validate_path("ns/_delta_log/00000000000000000001.json").is_ok());
    }

    #[test]
    fn rejects_absolute_and_empty() {
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("a//b").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(matches!(
            validate_path("ns/../../etc/passwd"),
            Err(StorageError::PathTraversal { .. })
        ));
    }
}
