//! Structured error taxonomy shared across every layer (spec §4.I).
//!
//! Individual crates keep their own `snafu`-derived error enums close to the operation that can
//! fail (the way the teacher's `data_types`, `schema`, `predicate`, and `iox_catalog` crates each
//! define a local `Error`), and convert into [`DbError`] at the crate boundary via `From`. This
//! crate is the one place the stable `{code, message, context, cause}` shape and the category
//! predicates live, so every consumer — regardless of which layer raised the error — gets the
//! same taxonomy.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A stable, serializable error code. Values are never renumbered; new codes are only ever
/// appended to the `snafu`-style taxonomy below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Catch-all for errors with no more specific code.
    Unknown,
    /// An unexpected internal invariant was violated.
    Internal,
    /// An operation did not complete within its allotted time.
    Timeout,
    /// Input failed a validation rule.
    ValidationFailed,
    /// Input was structurally invalid.
    InvalidInput,
    /// A required field was missing.
    RequiredField,
    /// A field had the wrong type.
    InvalidType,
    /// Generic not-found.
    NotFound,
    /// No entity exists at the given locator.
    EntityNotFound,
    /// No index exists with the given name.
    IndexNotFound,
    /// No event exists with the given id.
    EventNotFound,
    /// No snapshot exists at the requested version.
    SnapshotNotFound,
    /// No file exists at the given storage path.
    FileNotFound,
    /// Generic conflict.
    Conflict,
    /// An optimistic-concurrency version check failed.
    VersionConflict,
    /// The target already exists.
    AlreadyExists,
    /// A storage-level ETag precondition failed.
    EtagMismatch,
    /// A uniqueness constraint was violated.
    UniqueConstraint,
    /// A relationship-specific error.
    RelationshipError,
    /// Generic query error.
    QueryError,
    /// A filter document failed validation.
    InvalidFilter,
    /// Generic storage error.
    StorageError,
    /// A storage read specifically failed.
    StorageReadError,
    /// A quota was exceeded.
    QuotaExceeded,
    /// A storage path was malformed.
    InvalidPath,
    /// A storage path attempted to escape its root.
    PathTraversal,
    /// A network-level error occurred.
    NetworkError,
    /// Caller is not authorized for the operation.
    AuthorizationError,
    /// Caller must authenticate first.
    AuthenticationRequired,
    /// Caller is authenticated but lacks permission.
    PermissionDenied,
    /// A configuration value was invalid or missing.
    ConfigurationError,
    /// A remote-procedure-call-layer error (reserved for the transport layer above this crate).
    RpcError,
    /// An RPC-layer timeout.
    RpcTimeout,
    /// Generic secondary-index error.
    IndexError,
    /// An index failed to build.
    IndexBuildError,
    /// An index failed to load from storage.
    IndexLoadError,
    /// An index with that name already exists.
    IndexAlreadyExists,
    /// An event-log-specific error.
    EventError,
}

impl ErrorCode {
    /// The stable string form, e.g. `"VERSION_CONFLICT"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Internal => "INTERNAL",
            Self::Timeout => "TIMEOUT",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::RequiredField => "REQUIRED_FIELD",
            Self::InvalidType => "INVALID_TYPE",
            Self::NotFound => "NOT_FOUND",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::IndexNotFound => "INDEX_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::SnapshotNotFound => "SNAPSHOT_NOT_FOUND",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::EtagMismatch => "ETAG_MISMATCH",
            Self::UniqueConstraint => "UNIQUE_CONSTRAINT",
            Self::RelationshipError => "RELATIONSHIP_ERROR",
            Self::QueryError => "QUERY_ERROR",
            Self::InvalidFilter => "INVALID_FILTER",
            Self::StorageError => "STORAGE_ERROR",
            Self::StorageReadError => "STORAGE_READ_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::InvalidPath => "INVALID_PATH",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::NetworkError => "NETWORK_ERROR",
            Self::AuthorizationError => "AUTHORIZATION_ERROR",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::RpcError => "RPC_ERROR",
            Self::RpcTimeout => "RPC_TIMEOUT",
            Self::IndexError => "INDEX_ERROR",
            Self::IndexBuildError => "INDEX_BUILD_ERROR",
            Self::IndexLoadError => "INDEX_LOAD_ERROR",
            Self::IndexAlreadyExists => "INDEX_ALREADY_EXISTS",
            Self::EventError => "EVENT_ERROR",
        }
    }

    /// Map an HTTP-like status code to the corresponding category (spec §4.I "A factory maps
    /// HTTP-like statuses ... to the corresponding kinds").
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidInput,
            401 => Self::AuthenticationRequired,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::Conflict,
            408 => Self::Timeout,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    /// True for every "not found" variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::EntityNotFound
                | Self::IndexNotFound
                | Self::EventNotFound
                | Self::SnapshotNotFound
                | Self::FileNotFound
        )
    }

    /// True for every conflict/version-race variant.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::VersionConflict | Self::AlreadyExists | Self::EtagMismatch | Self::UniqueConstraint
        )
    }

    /// True for variants a caller should generally retry (spec §4.E "Retryability default").
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict | Self::EtagMismatch)
    }

    /// True for input-validation variants, raised at the API boundary (spec §7).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed | Self::InvalidInput | Self::RequiredField | Self::InvalidType | Self::InvalidFilter
        )
    }

    /// True for storage-layer variants.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageError
                | Self::StorageReadError
                | Self::QuotaExceeded
                | Self::InvalidPath
                | Self::PathTraversal
                | Self::NetworkError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error shape: `{code, message, context, cause}` (spec §4.I), serializable and
/// deserializable symmetrically (round-trip law (d) in spec §8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbError {
    /// The stable error code.
    pub code: ErrorCode,
    /// A human-readable message. Not part of the stable contract — may change wording.
    pub message: String,
    /// Freeform string context, e.g. `{"operation": "update", "namespace": "posts"}`.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// The error that caused this one, if any.
    #[serde(default)]
    pub cause: Option<Box<DbError>>,
}

impl DbError {
    /// Construct a new error with no context or cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    /// Attach a context key/value pair, builder-style.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a causing error, builder-style.
    pub fn with_cause(mut self, cause: DbError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach the standard API-boundary context fields in one call (spec §7: "the API boundary
    /// attaches context `{operation, namespace, entityId}`").
    pub fn with_operation_context(
        self,
        operation: &str,
        namespace: Option<&str>,
        entity_id: Option<&str>,
    ) -> Self {
        let mut err = self.with_context("operation", operation);
        if let Some(ns) = namespace {
            err = err.with_context("namespace", ns);
        }
        if let Some(id) = entity_id {
            err = err.with_context("entityId", id);
        }
        err
    }

    /// True if `self` or any link in the cause chain should be retried per spec §4.E.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable() || self.cause.as_deref().is_some_and(DbError::is_retryable)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("DbError serialization is infallible")
    }

    /// Deserialize from a JSON string produced by [`DbError::to_json`].
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Ergonomic guard: returns `Err(DbError::ValidationFailed)` with `ctx` attached when `cond` is
/// false (spec §4.I `assertValid`).
pub fn assert_valid(cond: bool, msg: impl Into<String>, ctx: &[(&str, &str)]) -> Result<(), DbError> {
    if cond {
        Ok(())
    } else {
        let mut err = DbError::new(ErrorCode::ValidationFailed, msg);
        for (k, v) in ctx {
            err = err.with_context(*k, *v);
        }
        Err(err)
    }
}

/// Ergonomic guard: unwraps `value` or returns a not-found error with the given `code` (defaults
/// to [`ErrorCode::NotFound`]) (spec §4.I `assertFound`).
pub fn assert_found<T>(value: Option<T>, msg: impl Into<String>, code: Option<ErrorCode>) -> Result<T, DbError> {
    value.ok_or_else(|| DbError::new(code.unwrap_or(ErrorCode::NotFound), msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_chain() {
        let err = DbError::new(ErrorCode::VersionConflict, "stale version")
            .with_context("namespace", "posts")
            .with_cause(DbError::new(ErrorCode::EtagMismatch, "etag changed"));
        let json = err.to_json();
        let back = DbError::from_json(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn retryable_follows_cause_chain() {
        let err = DbError::new(ErrorCode::Internal, "wrapped")
            .with_cause(DbError::new(ErrorCode::VersionConflict, "inner"));
        assert!(err.is_retryable());

        let not_retryable = DbError::new(ErrorCode::Internal, "no retry");
        assert!(!not_retryable.is_retryable());
    }

    #[test]
    fn status_factory_maps_known_statuses() {
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(409), ErrorCode::Conflict);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::Internal);
        assert_eq!(ErrorCode::from_status(999), ErrorCode::Unknown);
    }

    #[test]
    fn assert_helpers() {
        assert!(assert_valid(true, "ok", &[]).is_ok());
        let err = assert_valid(false, "bad", &[("field", "name")]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.context.get("field").map(String::as_str), Some("name"));

        let found: Result<i32, DbError> = assert_found(Some(1), "missing", None);
        assert_eq!(found.unwrap(), 1);
        let missing: Result<i32, DbError> =
            assert_found(None, "missing", Some(ErrorCode::EntityNotFound));
        assert_eq!(missing.unwrap_err().code, ErrorCode::EntityNotFound);
    }

    #[test]
    fn category_predicates() {
        assert!(ErrorCode::EntityNotFound.is_not_found());
        assert!(ErrorCode::VersionConflict.is_conflict());
        assert!(ErrorCode::InvalidFilter.is_validation());
        assert!(ErrorCode::PathTraversal.is_storage());
    }
}
