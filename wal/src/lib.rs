//! Per-namespace write-ahead buffering with threshold flushing and backpressure (spec §4.D).
//!
//! Mirrors the teacher's ingester lifecycle manager: writers log bytes into a per-namespace
//! buffer (`lifecycle::LifecycleHandle::log_write`), and once a count or byte threshold is
//! crossed the buffer is flushed to durable storage as a new WAL batch and writers that
//! outran flushing are paused (`can_resume_ingest`) until capacity frees up. The spec requires
//! at most one row per flushed batch (many events per row, not one row per event) so a
//! materializer can later mark each batch flushed without re-reading individual events.
#![warn(missing_docs)]

mod backpressure;
mod buffer;
mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use doc_time::{IdGenerator, TimeProviderRef};
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use schema::event::Event;
use serde::{Deserialize, Serialize};
use storage::{StorageBackend, WriteOptions};
use tokio_util::sync::CancellationToken;

pub use backpressure::{BackpressureConfig, BackpressureController, BackpressureSnapshot};
pub use buffer::EventBuffer;
pub use error::WalError;

/// Count/byte thresholds that trigger a namespace's buffer to flush (spec §4.D "Flushing").
#[derive(Debug, Clone)]
pub struct FlushThresholds {
    /// Flush once a namespace's buffer holds at least this many events.
    pub event_batch_count_threshold: usize,
    /// Flush once a namespace's buffer reaches this many estimated bytes.
    pub event_batch_size_threshold: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            event_batch_count_threshold: 100,
            event_batch_size_threshold: 64 * 1024,
        }
    }
}

/// Top-level WAL configuration.
#[derive(Debug, Clone, Default)]
pub struct WalConfig {
    /// Per-namespace flush thresholds.
    pub flush: FlushThresholds,
    /// Global backpressure bounds.
    pub backpressure: BackpressureConfig,
}

/// A durable WAL batch row (spec §4.D: "columns `(id autoinc, ns, first_seq, last_seq, events
/// blob, created_at, flushed=false)`"). One row per flushed buffer, never per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalBatch {
    /// Monotonically increasing id within the namespace (the segment's ULID, doubling as the
    /// spec's "autoinc" id since it is itself strictly increasing).
    pub id: String,
    /// The namespace this batch belongs to.
    pub namespace: String,
    /// Sequence number of the first event in this batch.
    pub first_seq: u64,
    /// Sequence number of the last event in this batch.
    pub last_seq: u64,
    /// The buffered events, in insertion order.
    pub events: Vec<Event>,
    /// When this batch was flushed, in milliseconds since the epoch.
    pub created_at: i64,
    /// Whether a downstream consumer (commit engine, materializer) has applied this batch.
    pub flushed: bool,
}

impl WalBatch {
    fn path(&self) -> String {
        batch_path(&self.namespace, &self.id)
    }
}

fn batch_path(namespace: &str, id: &str) -> String {
    format!("{namespace}/_wal/{id}.json")
}

/// A namespace-bucketed write-ahead buffer over a [`StorageBackend`].
///
/// Per-namespace buffer mutation is serialized through `buffers`' mutex, matching the spec's
/// linearizability requirement for WAL buffer operations (§4 "per-namespace WAL buffer
/// operations are linearizable").
#[derive(Debug)]
pub struct Wal {
    storage: Arc<dyn StorageBackend>,
    thresholds: FlushThresholds,
    buffers: Mutex<BTreeMap<String, EventBuffer>>,
    backpressure: Arc<BackpressureController>,
    ids: IdGenerator,
    time: TimeProviderRef,
}

impl Wal {
    /// Creates a new WAL writing batches through `storage`.
    pub fn new(storage: Arc<dyn StorageBackend>, config: WalConfig, time: TimeProviderRef) -> Self {
        let backpressure = Arc::new(BackpressureController::new(config.backpressure, Arc::clone(&time)));
        Self {
            storage,
            thresholds: config.flush,
            buffers: Mutex::new(BTreeMap::new()),
            backpressure,
            ids: IdGenerator::new(Arc::clone(&time)),
            time,
        }
    }

    /// A handle to this WAL's backpressure controller, for observability.
    pub fn backpressure(&self) -> &Arc<BackpressureController> {
        &self.backpressure
    }

    /// Appends `event` to its namespace's buffer, waiting for backpressure to release first
    /// (honoring `cancel`), and flushing the namespace's buffer if this append crosses a
    /// threshold.
    pub async fn append(
        &self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<Option<WalBatch>, WalError> {
        tokio::select! {
            result = self.backpressure.wait_for_capacity() => result?,
            _ = cancel.cancelled() => return Ok(None),
        }

        let namespace = event.namespace().to_string();
        let event_bytes = event.approx_size_bytes();
        self.backpressure.reserve(event_bytes, 1);

        let (count, bytes) = {
            let mut buffers = self.buffers.lock();
            buffers.entry(namespace.clone()).or_default().push(event)
        };

        if count >= self.thresholds.event_batch_count_threshold
            || bytes >= self.thresholds.event_batch_size_threshold
        {
            Ok(Some(self.flush_namespace(&namespace).await?))
        } else {
            Ok(None)
        }
    }

    /// Flushes `namespace`'s buffer unconditionally, writing a new WAL batch as a single object
    /// even if it is empty (an empty flush still records a row, matching "force flush" semantics
    /// used on shutdown).
    pub async fn flush_namespace(&self, namespace: &str) -> Result<WalBatch, WalError> {
        let (events, range, next_seq) = {
            let mut buffers = self.buffers.lock();
            let buf = buffers.entry(namespace.to_string()).or_default();
            let (events, range) = buf.take();
            (events, range, buf.next_seq())
        };
        let event_count = events.len();
        let freed_bytes: usize = events.iter().map(Event::approx_size_bytes).sum();
        let (first_seq, last_seq) = range.unwrap_or((next_seq.saturating_sub(1), next_seq.saturating_sub(1)));

        let batch = WalBatch {
            id: self.ids.next(),
            namespace: namespace.to_string(),
            first_seq,
            last_seq,
            events,
            created_at: self.time.now_millis(),
            flushed: false,
        };

        let body = serde_json::to_vec(&batch).expect("WalBatch is always serializable");
        self.storage
            .write_atomic(&batch.path(), Bytes::from(body), WriteOptions::default())
            .await?;
        self.backpressure.release(freed_bytes, event_count);
        self.backpressure.flush_queued();

        debug!(namespace, event_count, path = %batch.path(), "flushed WAL batch");
        Ok(batch)
    }

    /// Flushes every namespace with a non-empty buffer. Intended for graceful shutdown.
    pub async fn flush_all(&self) -> Result<Vec<WalBatch>, WalError> {
        let namespaces: Vec<String> = {
            let buffers = self.buffers.lock();
            buffers
                .iter()
                .filter(|(_, buf)| !buf.is_empty())
                .map(|(ns, _)| ns.clone())
                .collect()
        };
        let mut batches = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            batches.push(self.flush_namespace(&namespace).await?);
        }
        Ok(batches)
    }

    /// Lists `namespace`'s unflushed batches ordered by `first_seq`, for a downstream commit
    /// engine/materializer to apply (spec §4.D: "read unflushed batches ordered by
    /// `min_ts`/`first_seq`").
    pub async fn list_unflushed(&self, namespace: &str) -> Result<Vec<WalBatch>, WalError> {
        let prefix = format!("{namespace}/_wal/");
        let listing = self
            .storage
            .list(
                &prefix,
                storage::ListOptions {
                    pattern: Some("*.json".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let mut batches = Vec::with_capacity(listing.files.len());
        for file in listing.files {
            let bytes = self.storage.read(&file.path).await?;
            let batch: WalBatch =
                serde_json::from_slice(&bytes).map_err(|e| WalError::CorruptBatch {
                    path: file.path.clone(),
                    reason: e.to_string(),
                })?;
            if !batch.flushed {
                batches.push(batch);
            }
        }
        batches.sort_by_key(|b| b.first_seq);
        Ok(batches)
    }

    /// Marks `batch` as flushed (materialized) by rewriting its stored row, and releases the
    /// pending-flush slot it was holding.
    pub async fn mark_flushed(&self, namespace: &str, mut batch: WalBatch) -> Result<(), WalError> {
        batch.flushed = true;
        let body = serde_json::to_vec(&batch).expect("WalBatch is always serializable");
        self.storage
            .write(&batch_path(namespace, &batch.id), Bytes::from(body), WriteOptions::default())
            .await?;
        self.backpressure.flush_acked();
        Ok(())
    }

    /// Current buffered byte total across all namespaces, for observability.
    pub fn buffered_bytes(&self) -> usize {
        self.backpressure.buffered_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_time::MockProvider;
    use schema::entity::EntityId;
    use schema::event::{Op, Target};
    use storage::MemoryStore;

    fn make_wal(config: WalConfig) -> Wal {
        let time: TimeProviderRef = Arc::new(MockProvider::new(chrono::Utc::now()));
        Wal::new(Arc::new(MemoryStore::new()), config, time)
    }

    fn event(ns: &str) -> Event {
        Event {
            id: "x".into(),
            ts: 0,
            op: Op::Create,
            target: Target::Entity { id: EntityId::new(ns, "a") },
            before: None,
            after: Some(serde_json::json!({"a": 1})),
            actor: "a".into(),
        }
    }

    #[tokio::test]
    async fn flushes_once_count_threshold_crossed() {
        let wal = make_wal(WalConfig {
            flush: FlushThresholds {
                event_batch_count_threshold: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        assert!(wal.append(event("posts"), &cancel).await.unwrap().is_none());
        let batch = wal.append(event("posts"), &cancel).await.unwrap().unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.first_seq, 0);
        assert_eq!(batch.last_seq, 1);
        assert_eq!(wal.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn separate_namespaces_have_independent_buffers() {
        let wal = make_wal(WalConfig {
            flush: FlushThresholds {
                event_batch_count_threshold: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        assert!(wal.append(event("posts"), &cancel).await.unwrap().is_none());
        assert!(wal.append(event("users"), &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flush_all_drains_every_nonempty_namespace() {
        let wal = make_wal(WalConfig {
            flush: FlushThresholds {
                event_batch_count_threshold: 100,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        wal.append(event("posts"), &cancel).await.unwrap();
        wal.append(event("users"), &cancel).await.unwrap();
        let flushed = wal.flush_all().await.unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(wal.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn append_times_out_under_sustained_backpressure() {
        let wal = make_wal(WalConfig {
            flush: FlushThresholds {
                event_batch_count_threshold: 1_000_000,
                ..Default::default()
            },
            backpressure: BackpressureConfig {
                max_buffer_size_bytes: 1,
                timeout_ms: Some(20),
                ..Default::default()
            },
        });
        let cancel = CancellationToken::new();
        wal.append(event("posts"), &cancel).await.unwrap();
        let err = wal.append(event("posts"), &cancel).await.unwrap_err();
        assert!(matches!(err, WalError::BackpressureTimeout { .. }));
    }

    #[tokio::test]
    async fn list_unflushed_orders_by_first_seq_and_mark_flushed_hides_it() {
        let wal = make_wal(WalConfig {
            flush: FlushThresholds {
                event_batch_count_threshold: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let first = wal.append(event("posts"), &cancel).await.unwrap().unwrap();
        let second = wal.append(event("posts"), &cancel).await.unwrap().unwrap();
        assert!(first.first_seq < second.first_seq);

        let unflushed = wal.list_unflushed("posts").await.unwrap();
        assert_eq!(unflushed.len(), 2);
        assert_eq!(unflushed[0].id, first.id);

        wal.mark_flushed("posts", first).await.unwrap();
        let remaining = wal.list_unflushed("posts").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }

    #[tokio::test]
    async fn append_honors_cancellation_during_backpressure_wait() {
        let wal = make_wal(WalConfig {
            backpressure: BackpressureConfig {
                max_buffer_size_bytes: 1,
                timeout_ms: None,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        wal.append(event("posts"), &cancel).await.unwrap();
        cancel.cancel();
        let result = wal.append(event("posts"), &cancel).await.unwrap();
        assert!(result.is_none());
    }
}
