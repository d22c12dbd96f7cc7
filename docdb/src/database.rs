//! The top-level embeddable database handle (spec §4.J).

use std::collections::HashMap;
use std::sync::Arc;

use doc_time::{IdGenerator, TimeProviderRef};
use parking_lot::Mutex;
use storage::StorageBackend;
use wal::Wal;

use crate::collection::Collection;
use crate::config::DatabaseConfig;

/// An embeddable document database over one [`StorageBackend`].
///
/// Mirrors the teacher's `iox_tests::util::TestCatalog`: one shared backend, one shared clock and
/// id generator, and a cache of lazily opened per-namespace handles (here, [`Collection`]s rather
/// than `QuerierNamespace`s).
#[derive(Debug)]
pub struct Database {
    storage: Arc<dyn StorageBackend>,
    time: TimeProviderRef,
    ids: Arc<IdGenerator>,
    wal: Arc<Wal>,
    config: DatabaseConfig,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Opens a database over `storage`. `time` drives every id and timestamp this database and
    /// its collections produce, so tests can substitute a [`doc_time::MockProvider`].
    pub fn new(storage: Arc<dyn StorageBackend>, time: TimeProviderRef, config: DatabaseConfig) -> Self {
        let ids = Arc::new(IdGenerator::new(Arc::clone(&time)));
        let wal = Arc::new(Wal::new(Arc::clone(&storage), config.wal.clone(), Arc::clone(&time)));
        Self {
            storage,
            time,
            ids,
            wal,
            config,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the (lazily created, then cached) [`Collection`] for `namespace`.
    pub fn collection(&self, namespace: &str) -> Arc<Collection> {
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(namespace) {
            return Arc::clone(existing);
        }
        let collection = Arc::new(Collection::new(
            namespace,
            Arc::clone(&self.storage),
            Arc::clone(&self.time),
            Arc::clone(&self.ids),
            Arc::clone(&self.wal),
            self.config.checkpoint_interval,
        ));
        collections.insert(namespace.to_string(), Arc::clone(&collection));
        collection
    }

    /// The shared WAL every collection opened from this database appends to, for observability
    /// (e.g. polling [`wal::Wal::buffered_bytes`] in a backpressure test).
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use doc_time::MockProvider;
    use storage::MemoryStore;

    fn new_db() -> Database {
        let time: TimeProviderRef = Arc::new(MockProvider::new(Utc::now()));
        Database::new(Arc::new(MemoryStore::new()), time, DatabaseConfig::default())
    }

    #[test]
    fn collection_lookup_is_cached_per_namespace() {
        let db = new_db();
        let a = db.collection("posts");
        let b = db.collection("posts");
        assert!(Arc::ptr_eq(&a, &b));
        let c = db.collection("users");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
