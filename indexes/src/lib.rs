//! Secondary indexes backing the query planner: HNSW vector search, full-text search, bloom
//! membership filters, Hilbert-curve geospatial range scans, and ordered B-tree scans (spec
//! §4.H). Each index is built and queried independently; [`IndexRegistry`] is the
//! namespace-scoped collection a collection's query path consults.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub mod bloom;
pub mod btree;
pub mod error;
pub mod fts;
pub mod geo;
pub mod hnsw;

pub use bloom::{BloomFilter, BloomFilterIndex, BloomVerdict};
pub use btree::{BTreeIndex, IndexKey, OrderedFloat};
pub use error::IndexesError;
pub use fts::{FtsIndex, FtsIndexConfig, FuzzyConfig, Language, SearchHit};
pub use geo::GeoIndex;
pub use hnsw::{HnswConfig, HnswIndex, Metric, Precision, VectorHit, VectorSearchResult};

/// Which concrete index implementation backs an [`Index`] trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    FullText,
    Vector,
    Geo,
    Bloom,
}

/// Common identity every index implementation exposes to the registry, independent of its
/// query-specific API.
pub trait Index: Send + Sync {
    /// Which index family this is.
    fn kind(&self) -> IndexKind;

    /// Downcasting hook so callers holding a `dyn Index` (e.g. the query planner pulling a
    /// named index out of a registry) can recover the concrete type.
    fn as_any(&self) -> &dyn std::any::Any;
}

impl Index for BTreeIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::BTree
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Index for FtsIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::FullText
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Index for HnswIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Vector
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Index for GeoIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Geo
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Index for BloomFilterIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Bloom
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The object-store path a namespace's bloom index is persisted under.
pub fn bloom_index_path(namespace: &str) -> String {
    format!("indexes/bloom/{namespace}.bloom")
}

/// The object-store path a named vector index is persisted under.
pub fn vector_index_path(namespace: &str, index_name: &str) -> String {
    format!("indexes/vector/{namespace}.{index_name}.hnsw")
}

/// The object-store path prefix a named full-text index's files are persisted under; `ext`
/// distinguishes the postings file from any auxiliary metadata file.
pub fn fts_index_path(namespace: &str, index_name: &str, ext: &str) -> String {
    format!("indexes/fts/{namespace}.{index_name}.{ext}")
}

/// A namespace-scoped registry of named secondary indexes, guarded for concurrent readers against
/// the exclusive writer the spec's shared-resource policy requires (§4's "in-memory index writes
/// ... require an exclusive lock with respect to readers of the same index").
#[derive(Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<String, Arc<dyn Index>>>,
}

impl IndexRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the index named `name`.
    pub fn register(&self, name: impl Into<String>, index: Arc<dyn Index>) {
        self.indexes.write().insert(name.into(), index);
    }

    /// Removes the index named `name`, if present.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Index>> {
        self.indexes.write().remove(name)
    }

    /// Fetches the index named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Index>> {
        self.indexes.read().get(name).cloned()
    }

    /// The kind of the index named `name`, if registered.
    pub fn kind_of(&self, name: &str) -> Option<IndexKind> {
        self.get(name).map(|i| i.kind())
    }

    /// Names of every registered index.
    pub fn names(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_index_kind_by_name() {
        let registry = IndexRegistry::new();
        registry.register("by_name", Arc::new(BTreeIndex::new()));
        registry.register("by_tags", Arc::new(BloomFilterIndex::new(&["tags".to_string()], 100, 0.01)));

        assert_eq!(registry.kind_of("by_name"), Some(IndexKind::BTree));
        assert_eq!(registry.kind_of("by_tags"), Some(IndexKind::Bloom));
        assert_eq!(registry.kind_of("missing"), None);
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn remove_drops_the_index() {
        let registry = IndexRegistry::new();
        registry.register("idx", Arc::new(BTreeIndex::new()));
        assert!(registry.remove("idx").is_some());
        assert!(registry.get("idx").is_none());
    }

    #[test]
    fn storage_paths_match_spec_conventions() {
        assert_eq!(bloom_index_path("orders"), "indexes/bloom/orders.bloom");
        assert_eq!(vector_index_path("orders", "embeddings"), "indexes/vector/orders.embeddings.hnsw");
        assert_eq!(fts_index_path("orders", "notes", "postings"), "indexes/fts/orders.notes.postings");
    }
}
