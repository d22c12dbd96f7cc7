//! Failure modes across every secondary index (spec §4.H).

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

/// Errors raised by the index implementations in this crate.
#[derive(Debug, Snafu)]
pub enum IndexesError {
    /// A persisted HNSW index's header did not match the configured `{metric, dimensions,
    /// precision}` (spec §4.H.1: "Load enforces ... match the configured values").
    #[snafu(display(
        "vector index config mismatch: configured {configured}, persisted {persisted}"
    ))]
    VectorIndexConfig { configured: String, persisted: String },
    /// The persisted HNSW index's magic header did not match.
    #[snafu(display("not a valid HNSW index file: bad magic header"))]
    VectorIndexBadMagic,
    /// Two bloom filters with differing `{num_bits, num_hashes}` cannot be merged.
    #[snafu(display(
        "cannot merge bloom filters with different shapes: {lhs_bits}/{lhs_hashes} vs {rhs_bits}/{rhs_hashes}"
    ))]
    BloomShapeMismatch {
        lhs_bits: u64,
        lhs_hashes: u32,
        rhs_bits: u64,
        rhs_hashes: u32,
    },
    /// Persisted index bytes were truncated or malformed.
    #[snafu(display("corrupt index data: {reason}"))]
    Corrupt { reason: String },
}

impl From<IndexesError> for DbError {
    fn from(e: IndexesError) -> Self {
        let code = match &e {
            IndexesError::VectorIndexConfig { .. } | IndexesError::VectorIndexBadMagic => {
                ErrorCode::IndexLoadError
            }
            IndexesError::BloomShapeMismatch { .. } => ErrorCode::IndexError,
            IndexesError::Corrupt { .. } => ErrorCode::IndexLoadError,
        };
        DbError::new(code, e.to_string())
    }
}
