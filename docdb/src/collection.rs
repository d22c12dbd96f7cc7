//! A single namespace's CRUD surface (spec §4.J): an entity pointer gives compare-and-swap
//! point writes and is the admission gate for optimistic concurrency (module E), the WAL is the
//! durable record of what was admitted (module D), and periodic compaction replays that WAL to
//! materialize the columnar read path (module C) — it never re-derives state from the pointers.

use std::collections::BTreeMap;
use std::sync::Arc;

use dberror::{DbError, ErrorCode};
use doc_time::{IdGenerator, TimeProviderRef};
use indexes::IndexRegistry;
use observability_deps::tracing::debug;
use query::Filter;
use schema::action::{Action, AddAction, RemoveAction};
use schema::entity::{EntityId, EntityRecord, Relationship};
use schema::event::{Event, Op, Target};
use serde_json::{json, Map, Value};
use storage::{ListOptions, StorageBackend, StorageError, WriteOptions};
use table_log::{CommitOutcome, TableLog};
use tokio_util::sync::CancellationToken;
use wal::Wal;

fn entity_pointer_path(namespace: &str, local_id: &str) -> String {
    format!("{namespace}/entities/{local_id}.json")
}

fn relationship_pointer_path(namespace: &str, from_id: &str, predicate: &str, to_ns: &str, to_id: &str) -> String {
    format!("{namespace}/relationships/{from_id}__{predicate}__{to_ns}-{to_id}.json")
}

fn relationships_from_prefix(namespace: &str, from_id: &str) -> String {
    format!("{namespace}/relationships/{from_id}__")
}

/// Maps a failed compare-and-swap write on an entity pointer to `VersionConflict` — from the
/// caller's point of view, losing the pointer's etag race *is* a version conflict, even though
/// [`StorageError`]'s default `From` impl files it under the more generic `EtagMismatch` (spec
/// §4.E: "concurrent updates to same entity... the rest raise VersionConflict").
fn map_cas_error(err: StorageError, operation: &'static str, namespace: &str, local_id: &str) -> DbError {
    let mapped = match &err {
        StorageError::VersionMismatch { .. } => DbError::new(ErrorCode::VersionConflict, err.to_string()),
        _ => DbError::from(err),
    };
    mapped.with_operation_context(operation, Some(namespace), Some(local_id))
}

fn decode_pointer(bytes: &[u8], namespace: &str, local_id: &str) -> Result<EntityRecord, DbError> {
    serde_json::from_slice(bytes).map_err(|e| {
        DbError::new(ErrorCode::StorageReadError, format!("corrupt entity pointer: {e}"))
            .with_context("namespace", namespace)
            .with_context("entityId", local_id)
    })
}

/// Decodes an [`Event`]'s `before`/`after` field, which carries a full [`EntityRecord`] snapshot
/// rather than a bare payload diff — the shape a replaying compactor needs to reconstruct state
/// purely from the WAL, with no reference to any pointer file (spec §3 "Events are the durable
/// source of truth; entity rows are a materialization").
fn decode_event_record(value: &Value) -> Option<EntityRecord> {
    serde_json::from_value(value.clone()).ok()
}

/// Flattens an [`EntityRecord`] into the row shape a [`Filter`] evaluates against: its system
/// fields (spec §3 "Entity id form", `$id`/`$type`/...) alongside the payload's own fields.
fn entity_to_row(record: &EntityRecord) -> Value {
    let mut row = match &record.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    row.insert("$id".to_string(), json!(record.id.to_string()));
    row.insert("$type".to_string(), json!(record.type_));
    row.insert("name".to_string(), json!(record.name));
    row.insert("version".to_string(), json!(record.version));
    row.insert("createdAt".to_string(), json!(record.created_at.to_rfc3339()));
    row.insert("createdBy".to_string(), json!(record.created_by));
    row.insert("updatedAt".to_string(), json!(record.updated_at.to_rfc3339()));
    row.insert("updatedBy".to_string(), json!(record.updated_by));
    row.insert(
        "deletedAt".to_string(),
        record.deleted_at.map(|t| json!(t.to_rfc3339())).unwrap_or(Value::Null),
    );
    row.insert(
        "deletedBy".to_string(),
        record.deleted_by.clone().map(Value::String).unwrap_or(Value::Null),
    );
    Value::Object(row)
}

/// Applies `patch` to `payload`. A top-level `$inc` key names fields to increment numerically
/// (spec §3 "Atomic `$inc` mutators"); every other top-level key overwrites (or adds) the
/// matching payload field, MongoDB-`$set`-style.
fn apply_patch(payload: &mut Value, patch: &Value) {
    let Some(patch_obj) = patch.as_object() else { return };
    let payload_obj = match payload {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            other.as_object_mut().expect("just assigned an object")
        }
    };
    for (key, value) in patch_obj {
        if key == "$inc" {
            let Some(increments) = value.as_object() else { continue };
            for (field, delta) in increments {
                let Some(delta) = delta.as_f64() else { continue };
                let current = payload_obj.get(field).and_then(Value::as_f64).unwrap_or(0.0);
                let sum = current + delta;
                let encoded = serde_json::Number::from_f64(sum).map(Value::Number).unwrap_or(json!(0));
                payload_obj.insert(field.clone(), encoded);
            }
        } else {
            payload_obj.insert(key.clone(), value.clone());
        }
    }
}

/// One namespace's document collection: CRUD over entity pointers, backed by the WAL and
/// periodically materialized into a `table_log`-committed Parquet snapshot (spec §4.J).
pub struct Collection {
    namespace: String,
    storage: Arc<dyn StorageBackend>,
    time: TimeProviderRef,
    ids: Arc<IdGenerator>,
    wal: Arc<Wal>,
    table_log: TableLog,
    checkpoint_interval: u64,
    indexes: IndexRegistry,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .finish_non_exhaustive()
    }
}

impl Collection {
    pub(crate) fn new(
        namespace: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        time: TimeProviderRef,
        ids: Arc<IdGenerator>,
        wal: Arc<Wal>,
        checkpoint_interval: u64,
    ) -> Self {
        let namespace = namespace.into();
        let table_log = TableLog::new(Arc::clone(&storage), namespace.clone(), Arc::clone(&time));
        Self {
            namespace,
            storage,
            time,
            ids,
            wal,
            table_log,
            checkpoint_interval: checkpoint_interval.max(1),
            indexes: IndexRegistry::new(),
        }
    }

    /// This collection's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The secondary-index registry consulted by [`Self::find`]'s `$vector` clauses and rebuilt
    /// by callers that maintain bloom/FTS/vector indexes over this namespace (spec §4.H).
    pub fn indexes(&self) -> &IndexRegistry {
        &self.indexes
    }

    /// Appends `op` on `id` to the WAL and awaits its durability (spec §2 data flow "D (buffer)"
    /// follows "E (version check)"): the pointer compare-and-swap above already arbitrated which
    /// writer won, so this call records that winning decision as the durable fact. `before`/
    /// `after` carry the full [`EntityRecord`] snapshot (`None` only for `before` on create),
    /// not just the payload, so a compactor can rebuild state from events alone.
    async fn append_event(
        &self,
        op: Op,
        id: EntityId,
        before: Option<&EntityRecord>,
        after: Option<&EntityRecord>,
        actor: &str,
        operation: &'static str,
    ) -> Result<(), DbError> {
        let event = Event {
            id: self.ids.next(),
            ts: self.time.now_millis(),
            op,
            target: Target::Entity { id: id.clone() },
            before: before.map(|r| serde_json::to_value(r).expect("EntityRecord is always serializable")),
            after: after.map(|r| serde_json::to_value(r).expect("EntityRecord is always serializable")),
            actor: actor.to_string(),
        };
        let cancel = CancellationToken::new();
        self.wal.append(event, &cancel).await.map_err(|e| {
            DbError::from(e).with_operation_context(operation, Some(&self.namespace), Some(&id.local_id))
        })?;
        Ok(())
    }

    /// Creates a new entity, assigning it a fresh id and `version: 1` (spec §3 "Entity").
    pub async fn insert(&self, type_: &str, name: &str, payload: Value, actor: &str) -> Result<EntityRecord, DbError> {
        let local_id = self.ids.next();
        let now = self.time.now();
        let record = EntityRecord {
            id: EntityId::new(&self.namespace, &local_id),
            type_: type_.to_string(),
            name: name.to_string(),
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
            version: 1,
            deleted_at: None,
            deleted_by: None,
            payload,
        };
        // No pointer exists yet to arbitrate a race on this fresh id, so the event — the durable
        // fact that this entity was created — is appended before the pointer materializes it.
        self.append_event(Op::Create, record.id.clone(), None, Some(&record), actor, "insert")
            .await?;

        let bytes = serde_json::to_vec(&record).expect("EntityRecord is always serializable");
        self.storage
            .write_atomic(&entity_pointer_path(&self.namespace, &local_id), bytes.into(), WriteOptions::default())
            .await
            .map_err(|e| DbError::from(e).with_operation_context("insert", Some(&self.namespace), Some(&local_id)))?;

        debug!(namespace = %self.namespace, local_id = %local_id, "inserted entity");
        Ok(record)
    }

    /// Reads an entity's current pointer directly, bypassing the compacted Parquet snapshot —
    /// always strongly consistent with the most recent successful write (spec §3 "get").
    pub async fn get(&self, local_id: &str) -> Result<Option<EntityRecord>, DbError> {
        let path = entity_pointer_path(&self.namespace, local_id);
        match self.storage.read(&path).await {
            Ok(bytes) => Ok(Some(decode_pointer(&bytes, &self.namespace, local_id)?)),
            Err(StorageError::FileNotFound { .. }) => Ok(None),
            Err(e) => Err(DbError::from(e).with_operation_context("get", Some(&self.namespace), Some(local_id))),
        }
    }

    async fn load_for_write(&self, local_id: &str, operation: &'static str) -> Result<(storage::ObjectStat, EntityRecord), DbError> {
        let path = entity_pointer_path(&self.namespace, local_id);
        let stat = self
            .storage
            .stat(&path)
            .await
            .map_err(|e| map_cas_error(e, operation, &self.namespace, local_id))?;
        let bytes = self
            .storage
            .read(&path)
            .await
            .map_err(|e| map_cas_error(e, operation, &self.namespace, local_id))?;
        let record = decode_pointer(&bytes, &self.namespace, local_id)?;
        if record.is_deleted() {
            return Err(DbError::new(ErrorCode::EntityNotFound, "entity is deleted")
                .with_operation_context(operation, Some(&self.namespace), Some(local_id)));
        }
        Ok((stat, record))
    }

    /// Applies `patch` to an existing entity, optionally conditioned on `expected_version`
    /// (spec §4.E). A lost race on the pointer's compare-and-swap write raises
    /// [`ErrorCode::VersionConflict`], the same code a caller-supplied `expected_version`
    /// mismatch raises.
    pub async fn update(
        &self,
        local_id: &str,
        patch: Value,
        expected_version: Option<u64>,
        actor: &str,
    ) -> Result<EntityRecord, DbError> {
        let (stat, mut record) = self.load_for_write(local_id, "update").await?;
        occ::check_expected_version(record.version, expected_version, Some(&self.namespace), Some(local_id))?;
        let before = record.clone();

        apply_patch(&mut record.payload, &patch);
        record.version = occ::next_version(record.version);
        record.updated_at = self.time.now();
        record.updated_by = actor.to_string();

        // The compare-and-swap below is the OCC admission gate (module E): it decides which of
        // any racing writers wins before anything reaches the WAL. Only the winner's event is
        // ever appended, so a replaying compactor never sees the losers' attempts.
        let path = entity_pointer_path(&self.namespace, local_id);
        let bytes = serde_json::to_vec(&record).expect("EntityRecord is always serializable");
        self.storage
            .write_conditional(&path, bytes.into(), Some(&stat.etag))
            .await
            .map_err(|e| map_cas_error(e, "update", &self.namespace, local_id))?;

        self.append_event(Op::Update, record.id.clone(), Some(&before), Some(&record), actor, "update")
            .await?;
        Ok(record)
    }

    /// Applies `{$inc: {field: delta, ...}}` atomically against the latest durably-visible
    /// value, retrying the compare-and-swap internally so concurrent incrementers never lose an
    /// update the way a naive read-modify-write under a caller-supplied `expectedVersion` would
    /// (spec §3 "Atomic `$inc` mutators avoid lost updates").
    pub async fn increment(&self, local_id: &str, increments: Value, actor: &str) -> Result<EntityRecord, DbError> {
        let patch = json!({ "$inc": increments });
        let cancel = CancellationToken::new();
        let outcome = occ::with_retry(
            || {
                let patch = patch.clone();
                async { self.update(local_id, patch, None, actor).await }
            },
            occ::RetryConfig::default(),
            &cancel,
        )
        .await;
        outcome.result
    }

    /// Soft-deletes an entity, optionally conditioned on `expected_version`. The entity pointer
    /// is kept (with `deletedAt`/`deletedBy` set) rather than removed, so `get` can still report
    /// that the id once existed.
    pub async fn delete(&self, local_id: &str, expected_version: Option<u64>, actor: &str) -> Result<(), DbError> {
        let (stat, mut record) = self.load_for_write(local_id, "delete").await?;
        occ::check_expected_version(record.version, expected_version, Some(&self.namespace), Some(local_id))?;
        let before = record.clone();

        record.version = occ::next_version(record.version);
        record.updated_at = self.time.now();
        record.updated_by = actor.to_string();
        record.deleted_at = Some(record.updated_at);
        record.deleted_by = Some(actor.to_string());

        let path = entity_pointer_path(&self.namespace, local_id);
        let bytes = serde_json::to_vec(&record).expect("EntityRecord is always serializable");
        self.storage
            .write_conditional(&path, bytes.into(), Some(&stat.etag))
            .await
            .map_err(|e| map_cas_error(e, "delete", &self.namespace, local_id))?;

        // `after` still carries the (now soft-deleted) record: entities have no hard-delete
        // event, only a materialized state with `deletedAt`/`deletedBy` set.
        self.append_event(Op::Delete, record.id.clone(), Some(&before), Some(&record), actor, "delete")
            .await?;
        Ok(())
    }

    /// Creates a directed, tagged relationship `(this namespace, from_id) --predicate--> (to_ns,
    /// to_id)` (spec §3 "Relationship"). Relationship pointers are read directly rather than
    /// through the compacted Parquet snapshot `find` uses — the spec defines no relationship
    /// query filter syntax (§4.F is entity-only), so there is no planner to feed.
    pub async fn link(
        &self,
        from_id: &str,
        predicate: &str,
        to_ns: &str,
        to_id: &str,
        payload: Option<Value>,
        actor: &str,
    ) -> Result<Relationship, DbError> {
        let now = self.time.now();
        let relationship = Relationship {
            from_ns: self.namespace.clone(),
            from_id: from_id.to_string(),
            predicate: predicate.to_string(),
            to_ns: to_ns.to_string(),
            to_id: to_id.to_string(),
            version: 1,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
            payload,
        };
        // Freshly keyed by (from_id, predicate, to_ns, to_id); `write_atomic` below is itself
        // the only admission gate a create needs, so the event is durable before it materializes.
        self.append_relationship_event(Op::Create, &relationship, None, Some(&relationship), actor, "link")
            .await?;

        let path = relationship_pointer_path(&self.namespace, from_id, predicate, to_ns, to_id);
        let bytes = serde_json::to_vec(&relationship).expect("Relationship is always serializable");
        self.storage
            .write_atomic(&path, bytes.into(), WriteOptions::default())
            .await
            .map_err(|e| DbError::from(e).with_operation_context("link", Some(&self.namespace), Some(from_id)))?;

        Ok(relationship)
    }

    /// Removes a relationship. Relationships have no soft-delete marker (unlike entities, spec
    /// §3 draws that distinction explicitly), so this is a hard delete of the pointer.
    pub async fn unlink(&self, from_id: &str, predicate: &str, to_ns: &str, to_id: &str, actor: &str) -> Result<(), DbError> {
        let path = relationship_pointer_path(&self.namespace, from_id, predicate, to_ns, to_id);
        let bytes = self.storage.read(&path).await.map_err(|e| {
            DbError::from(e).with_operation_context("unlink", Some(&self.namespace), Some(from_id))
        })?;
        let relationship: Relationship = serde_json::from_slice(&bytes).map_err(|e| {
            DbError::new(ErrorCode::StorageReadError, format!("corrupt relationship pointer: {e}"))
        })?;

        // The existence read above is this op's admission gate (there is no CAS primitive for a
        // hard delete); once it's resolved, the event is the durable record before the pointer
        // is reclaimed.
        self.append_relationship_event(Op::Delete, &relationship, Some(&relationship), None, actor, "unlink")
            .await?;

        self.storage
            .delete(&path)
            .await
            .map_err(|e| DbError::from(e).with_operation_context("unlink", Some(&self.namespace), Some(from_id)))?;
        Ok(())
    }

    /// Lists every relationship whose `from_id` is `from_id`, read directly from their pointers
    /// (always strongly consistent, like [`Self::get`]).
    pub async fn relationships_from(&self, from_id: &str) -> Result<Vec<Relationship>, DbError> {
        let prefix = relationships_from_prefix(&self.namespace, from_id);
        let listing = self.storage.list(&prefix, ListOptions::default()).await?;
        let mut out = Vec::with_capacity(listing.files.len());
        for file in listing.files {
            let bytes = self.storage.read(&file.path).await?;
            let relationship: Relationship = serde_json::from_slice(&bytes).map_err(|e| {
                DbError::new(ErrorCode::StorageReadError, format!("corrupt relationship pointer: {e}"))
            })?;
            out.push(relationship);
        }
        Ok(out)
    }

    async fn append_relationship_event(
        &self,
        op: Op,
        rel: &Relationship,
        before: Option<&Relationship>,
        after: Option<&Relationship>,
        actor: &str,
        operation: &'static str,
    ) -> Result<(), DbError> {
        let event = Event {
            id: self.ids.next(),
            ts: self.time.now_millis(),
            op,
            target: Target::Relationship {
                from_ns: rel.from_ns.clone(),
                from_id: rel.from_id.clone(),
                predicate: rel.predicate.clone(),
                to_ns: rel.to_ns.clone(),
                to_id: rel.to_id.clone(),
            },
            before: before.map(|r| serde_json::to_value(r).expect("Relationship is always serializable")),
            after: after.map(|r| serde_json::to_value(r).expect("Relationship is always serializable")),
            actor: actor.to_string(),
        };
        let cancel = CancellationToken::new();
        self.wal.append(event, &cancel).await.map_err(|e| {
            DbError::from(e).with_operation_context(operation, Some(&self.namespace), Some(&rel.from_id))
        })?;
        Ok(())
    }

    /// Evaluates `filter_doc` (spec §4.F) against the latest *compacted* Parquet snapshot — see
    /// the module-level docs for why this lags `get`'s strong consistency. Call [`Self::flush`]
    /// first for read-your-writes.
    pub async fn find(&self, filter_doc: &Value) -> Result<Vec<EntityRecord>, DbError> {
        let filter = Filter::parse(filter_doc)?;
        filter.validate()?;

        let state = self.table_log.load_state().await?;
        let candidates = query::prune_by_stats(&filter, &state.files);

        let mut results = Vec::new();
        for path in candidates {
            let full_path = format!("{}/{}", self.namespace, path);
            let bytes = self.storage.read(&full_path).await?;
            for entity in parquet_file::read_entities(bytes)? {
                if filter.matches(&entity_to_row(&entity)) {
                    results.push(entity);
                }
            }
        }
        Ok(results)
    }

    /// Forces this namespace's buffered WAL events to flush and its entity pointers to compact,
    /// so a subsequent [`Self::find`] observes every write made before this call returns.
    pub async fn flush(&self) -> Result<(), DbError> {
        self.compact().await?;
        Ok(())
    }

    /// Materializes this namespace's current entity state into a fresh Parquet file and commits
    /// it to the table log as one atomic `Remove*` + `Add` transaction (spec §4.C
    /// "one-writer-wins per version", §4.B "row-group statistics"), checkpointing the log every
    /// `checkpoint_interval` versions. Current state is built by replaying every unflushed WAL
    /// batch's events onto the previously-compacted snapshot (spec §3 "Events are the durable
    /// source of truth; entity rows are a materialization"; §4.D "read unflushed batches ...
    /// materialize the effects, and then mark the batches flushed") — it never reads the entity
    /// pointers those writes also maintain.
    pub async fn compact(&self) -> Result<CommitOutcome, DbError> {
        // Force any events still sitting in the in-memory WAL buffer onto durable storage first —
        // `list_unflushed` below only sees batches that have already been written, so without this
        // a compaction run right after a write (before the buffer crosses its own flush threshold)
        // would silently skip that write's event.
        self.wal.flush_namespace(&self.namespace).await?;

        let state = self.table_log.load_state().await?;

        let mut records: BTreeMap<String, EntityRecord> = BTreeMap::new();
        for path in state.files.keys() {
            let full_path = format!("{}/{}", self.namespace, path);
            let bytes = self.storage.read(&full_path).await?;
            for record in parquet_file::read_entities(bytes)? {
                records.insert(record.id.local_id.clone(), record);
            }
        }

        let unflushed = self.wal.list_unflushed(&self.namespace).await?;
        for batch in &unflushed {
            for event in &batch.events {
                let Target::Entity { id } = &event.target else { continue };
                if id.namespace != self.namespace {
                    continue;
                }
                match &event.after {
                    Some(after) => {
                        let record = decode_event_record(after).ok_or_else(|| {
                            DbError::new(ErrorCode::StorageReadError, "corrupt WAL event: undecodable entity snapshot")
                                .with_context("namespace", &self.namespace)
                                .with_context("entityId", &id.local_id)
                        })?;
                        records.insert(id.local_id.clone(), record);
                    }
                    None => {
                        records.remove(&id.local_id);
                    }
                }
            }
        }
        let records: Vec<EntityRecord> = records.into_values().collect();

        let encoded = parquet_file::write_entities(&records)?;
        let mut stats = encoded.stats;
        for record in &records {
            if let Some(payload_fields) = record.payload.as_object() {
                for (field, value) in payload_fields {
                    stats.observe(field, Some(value));
                }
            }
        }
        let size = encoded.bytes.len() as u64;

        let relative_path = format!("data/{}.parquet", self.ids.next());
        let full_path = format!("{}/{}", self.namespace, relative_path);
        self.storage.write_atomic(&full_path, encoded.bytes, WriteOptions::default()).await?;

        let mut actions: Vec<Action> = state
            .files
            .keys()
            .map(|path| {
                Action::Remove(RemoveAction {
                    path: path.clone(),
                    deletion_timestamp: self.time.now_millis(),
                    data_change: false,
                    extended_file_metadata: None,
                })
            })
            .collect();
        actions.push(Action::Add(AddAction {
            path: relative_path,
            size,
            modification_time: self.time.now_millis(),
            data_change: true,
            partition_values: Default::default(),
            stats: Some(stats.to_json()),
            tags: None,
        }));

        let outcome = self.table_log.commit(actions, "COMPACT").await?;

        if outcome.version % self.checkpoint_interval == 0 {
            self.table_log.checkpoint().await?;
        }

        for batch in unflushed {
            self.wal.mark_flushed(&self.namespace, batch).await?;
        }

        for old_path in state.files.keys() {
            let full_old_path = format!("{}/{}", self.namespace, old_path);
            // Best-effort: a leftover superseded file only wastes space, it's no longer
            // referenced by the committed table state.
            let _ = self.storage.delete(&full_old_path).await;
        }

        debug!(namespace = %self.namespace, version = outcome.version, rows = records.len(), "compacted entities from WAL replay");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use doc_time::MockProvider;
    use storage::MemoryStore;
    use wal::{BackpressureConfig, FlushThresholds, WalConfig};

    fn new_collection(checkpoint_interval: u64, wal_config: WalConfig) -> Collection {
        let time: TimeProviderRef = Arc::new(MockProvider::new(Utc::now()));
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStore::new());
        let ids = Arc::new(IdGenerator::new(Arc::clone(&time)));
        let wal = Arc::new(Wal::new(Arc::clone(&storage), wal_config, Arc::clone(&time)));
        Collection::new("counters", storage, time, ids, wal, checkpoint_interval)
    }

    // S1 — OCC conflict resolution (spec §7): ten concurrent updates racing on the same
    // expectedVersion, exactly one should win.
    #[tokio::test]
    async fn concurrent_updates_with_same_expected_version_exactly_one_wins() {
        let collection = Arc::new(new_collection(10, WalConfig::default()));
        let created = collection.insert("counter", "c1", json!({"value": 0}), "system").await.unwrap();
        assert_eq!(created.version, 1);

        let mut handles = Vec::new();
        for n in 0..10 {
            let collection = Arc::clone(&collection);
            let local_id = created.id.local_id.clone();
            handles.push(tokio::spawn(async move {
                collection
                    .update(&local_id, json!({"value": n}), Some(1), "writer")
                    .await
            }));
        }

        let mut successes = 0;
        let mut version_conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(record) => {
                    assert_eq!(record.version, 2);
                    successes += 1;
                }
                Err(err) => {
                    assert_eq!(err.code, ErrorCode::VersionConflict);
                    version_conflicts += 1;
                }
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(version_conflicts, 9);

        let final_record = collection.get(&created.id.local_id).await.unwrap().unwrap();
        assert_eq!(final_record.version, 2);
        assert!((0..10).contains(&final_record.payload["value"].as_i64().unwrap()));
    }

    #[tokio::test]
    async fn atomic_increment_never_loses_a_concurrent_update() {
        let collection = Arc::new(new_collection(10, WalConfig::default()));
        let created = collection.insert("counter", "c1", json!({"value": 0}), "system").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let collection = Arc::clone(&collection);
            let local_id = created.id.local_id.clone();
            handles.push(tokio::spawn(async move {
                collection.increment(&local_id, json!({"value": 1}), "writer").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_record = collection.get(&created.id.local_id).await.unwrap().unwrap();
        assert_eq!(final_record.payload["value"], json!(10.0));
        assert_eq!(final_record.version, 11);
    }

    #[tokio::test]
    async fn get_sees_writes_immediately_but_find_lags_until_flush() {
        let collection = new_collection(10, WalConfig::default());
        let created = collection.insert("post", "p1", json!({"title": "hello"}), "user-1").await.unwrap();

        assert!(collection.get(&created.id.local_id).await.unwrap().is_some());
        assert!(collection.find(&json!({"title": "hello"})).await.unwrap().is_empty());

        collection.flush().await.unwrap();
        let found = collection.find(&json!({"title": "hello"})).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id);
    }

    // S2 — checkpoint interval (spec §4.C): committing past the interval writes a checkpoint.
    #[tokio::test]
    async fn compacting_past_checkpoint_interval_writes_a_checkpoint() {
        let collection = new_collection(10, WalConfig::default());
        for n in 0..11 {
            collection
                .insert("post", &format!("p{n}"), json!({"n": n}), "user-1")
                .await
                .unwrap();
            collection.compact().await.unwrap();
        }
        let state = collection.table_log.load_state().await.unwrap();
        assert_eq!(state.version, 11);
        assert_eq!(state.files.len(), 1, "each compaction replaces all prior files with one");
    }

    // S3 — WAL batches flush once the event-count threshold is crossed (spec §4.D).
    #[tokio::test]
    async fn wal_flushes_once_event_count_threshold_crossed() {
        let collection = new_collection(
            10,
            WalConfig { flush: FlushThresholds { event_batch_count_threshold: 500, ..Default::default() }, ..Default::default() },
        );
        for n in 0..500 {
            collection.insert("post", &format!("p{n}"), json!({"n": n}), "user-1").await.unwrap();
        }
        // `insert` awaits the WAL append directly, so by the time the 500th call returns the
        // threshold crossing (and the flush it triggers) has already happened.
        assert_eq!(collection.wal.buffered_bytes(), 0);
    }

    // S4 — sustained writers back off under WAL backpressure (spec §4.D).
    #[tokio::test]
    async fn wal_append_backs_off_under_sustained_backpressure() {
        let collection = new_collection(
            10,
            WalConfig {
                flush: FlushThresholds { event_batch_count_threshold: 1_000_000, ..Default::default() },
                backpressure: BackpressureConfig { max_buffer_size_bytes: 1, timeout_ms: Some(20), ..Default::default() },
            },
        );
        let cancel = CancellationToken::new();
        let event = Event {
            id: "x".into(),
            ts: 0,
            op: Op::Create,
            target: Target::Entity { id: EntityId::new("counters", "a") },
            before: None,
            after: Some(json!({"a": 1})),
            actor: "a".into(),
        };
        collection.wal.append(event.clone(), &cancel).await.unwrap();
        let err = collection.wal.append(event, &cancel).await.unwrap_err();
        assert!(matches!(err, wal::WalError::BackpressureTimeout { .. }));
    }

    // S5 — file-level pruning by column statistics (spec §4.F): only the file whose `age` range
    // overlaps the filter should be read.
    #[tokio::test]
    async fn find_prunes_files_whose_age_range_cannot_match() {
        let collection = new_collection(10, WalConfig::default());
        for (n, age) in [(0, 10), (1, 20), (2, 30)] {
            collection.insert("person", &format!("young{n}"), json!({"age": age}), "user-1").await.unwrap();
        }
        collection.flush().await.unwrap();
        for (n, age) in [(0, 31), (1, 40), (2, 50)] {
            collection.insert("person", &format!("mid{n}"), json!({"age": age}), "user-1").await.unwrap();
        }
        collection.flush().await.unwrap();
        for (n, age) in [(0, 51), (1, 60), (2, 70)] {
            collection.insert("person", &format!("old{n}"), json!({"age": age}), "user-1").await.unwrap();
        }
        collection.flush().await.unwrap();

        let state = collection.table_log.load_state().await.unwrap();
        assert_eq!(state.files.len(), 3, "each flush's compaction replaces prior files with one new file");

        let found = collection.find(&json!({"age": {"$gt": 60}})).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload["age"], json!(70));
    }

    #[tokio::test]
    async fn deleted_entity_is_soft_deleted_and_rejects_further_writes() {
        let collection = new_collection(10, WalConfig::default());
        let created = collection.insert("post", "p1", json!({"title": "hello"}), "user-1").await.unwrap();
        collection.delete(&created.id.local_id, Some(1), "user-1").await.unwrap();

        let record = collection.get(&created.id.local_id).await.unwrap().unwrap();
        assert!(record.is_deleted());
        assert_eq!(record.version, 2);

        let err = collection.update(&created.id.local_id, json!({"title": "nope"}), None, "user-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EntityNotFound);
    }

    #[tokio::test]
    async fn update_without_expected_version_is_last_writer_wins() {
        let collection = new_collection(10, WalConfig::default());
        let created = collection.insert("post", "p1", json!({"title": "a"}), "user-1").await.unwrap();
        let updated = collection.update(&created.id.local_id, json!({"title": "b"}), None, "user-2").await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload["title"], json!("b"));
    }

    #[tokio::test]
    async fn link_and_unlink_relationship_round_trips() {
        let collection = new_collection(10, WalConfig::default());
        let post = collection.insert("post", "p1", json!({"title": "hello"}), "user-1").await.unwrap();

        let rel = collection
            .link(&post.id.local_id, "author", "users", "u1", Some(json!({"role": "owner"})), "user-1")
            .await
            .unwrap();
        assert_eq!(rel.from_ns, "counters");
        assert_eq!(rel.version, 1);

        let found = collection.relationships_from(&post.id.local_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].predicate, "author");

        collection.unlink(&post.id.local_id, "author", "users", "u1", "user-1").await.unwrap();
        let found = collection.relationships_from(&post.id.local_id).await.unwrap();
        assert!(found.is_empty());
    }
}
