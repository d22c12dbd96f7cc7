//! Backpressure on WAL writers once buffered work outruns flushing (spec §4.D "Backpressure").

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use doc_time::TimeProviderRef;
use tokio::sync::Notify;

use crate::error::WalError;

/// Bounds governing when writers are paused and how they resume (spec §4.D "configuration
/// {max_buffer_size_bytes, max_buffer_event_count, max_pending_flushes, release_threshold,
/// timeout_ms}").
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Pause writers once buffered bytes reach this total.
    pub max_buffer_size_bytes: usize,
    /// Pause writers once buffered event count reaches this total.
    pub max_buffer_event_count: usize,
    /// Pause writers once this many flushed-but-unacknowledged batches are outstanding.
    pub max_pending_flushes: usize,
    /// Fraction of each bound (in `(0, 1]`) that buffered totals must drop back under before
    /// writers resume. A value of `1.0` resumes as soon as totals are strictly under the bound;
    /// lower values add hysteresis so writers don't thrash right at the limit.
    pub release_threshold: f64,
    /// Maximum time a writer will wait for capacity before giving up. `None` disables the
    /// timeout and waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_buffer_size_bytes: 64 * 1024 * 1024,
            max_buffer_event_count: 100_000,
            max_pending_flushes: 64,
            release_threshold: 0.8,
            timeout_ms: Some(30_000),
        }
    }
}

/// A point-in-time snapshot of backpressure state, attached to `WalError::BackpressureTimeout`
/// and available for observability (spec §4.D "state {active, current_buffer_size_bytes, ...}").
#[derive(Debug, Clone, PartialEq)]
pub struct BackpressureSnapshot {
    /// Whether writers are currently being paused.
    pub active: bool,
    /// Current buffered byte total across all namespaces.
    pub current_buffer_size_bytes: usize,
    /// Current buffered event count across all namespaces.
    pub current_event_count: usize,
    /// Flushed batches not yet acknowledged by downstream consumers.
    pub pending_flush_count: usize,
    /// Cumulative count of times backpressure became active.
    pub backpressure_events: u64,
    /// Cumulative milliseconds writers have spent waiting.
    pub total_wait_time_ms: u64,
    /// Epoch millis of the most recent transition into backpressure, if any.
    pub last_backpressure_at: Option<i64>,
}

/// Tracks buffered bytes/events/pending-flushes and makes writers wait once any bound is
/// exceeded, releasing them once totals fall back under `release_threshold × bound`.
#[derive(Debug)]
pub struct BackpressureController {
    config: BackpressureConfig,
    current_buffer_size_bytes: AtomicUsize,
    current_event_count: AtomicUsize,
    pending_flush_count: AtomicUsize,
    active: AtomicBool,
    backpressure_events: AtomicU64,
    total_wait_time_ms: AtomicU64,
    last_backpressure_at: AtomicI64,
    notify: Notify,
    time: TimeProviderRef,
}

impl BackpressureController {
    /// Creates a controller bound by `config`, using `time` to timestamp transitions into
    /// backpressure.
    pub fn new(config: BackpressureConfig, time: TimeProviderRef) -> Self {
        Self {
            config,
            current_buffer_size_bytes: AtomicUsize::new(0),
            current_event_count: AtomicUsize::new(0),
            pending_flush_count: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            backpressure_events: AtomicU64::new(0),
            total_wait_time_ms: AtomicU64::new(0),
            last_backpressure_at: AtomicI64::new(0),
            notify: Notify::new(),
            time,
        }
    }

    /// Records `bytes`/`events` additional buffered work.
    pub fn reserve(&self, bytes: usize, events: usize) {
        self.current_buffer_size_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.current_event_count.fetch_add(events, Ordering::SeqCst);
        if self.is_over_capacity() && !self.active.swap(true, Ordering::SeqCst) {
            self.backpressure_events.fetch_add(1, Ordering::SeqCst);
            self.last_backpressure_at
                .store(self.time.now_millis(), Ordering::SeqCst);
        }
    }

    /// Records `bytes`/`events` freed by a flush, waking waiters if totals have dropped back
    /// under the release threshold.
    pub fn release(&self, bytes: usize, events: usize) {
        self.current_buffer_size_bytes.fetch_sub(bytes, Ordering::SeqCst);
        self.current_event_count.fetch_sub(events, Ordering::SeqCst);
        self.maybe_release();
    }

    /// Marks one flushed batch as queued for downstream consumption (spec's `pending_flush_count`).
    pub fn flush_queued(&self) {
        self.pending_flush_count.fetch_add(1, Ordering::SeqCst);
        if self.is_over_capacity() && !self.active.swap(true, Ordering::SeqCst) {
            self.backpressure_events.fetch_add(1, Ordering::SeqCst);
            self.last_backpressure_at
                .store(self.time.now_millis(), Ordering::SeqCst);
        }
    }

    /// Marks one previously queued batch as acknowledged (materialized) by a downstream consumer.
    pub fn flush_acked(&self) {
        self.pending_flush_count.fetch_sub(1, Ordering::SeqCst);
        self.maybe_release();
    }

    fn maybe_release(&self) {
        if self.under_release_threshold() {
            self.active.store(false, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    /// Immediately clears backpressure and wakes every waiter, regardless of current totals.
    pub fn force_release_backpressure(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether any configured bound is currently exceeded.
    pub fn is_over_capacity(&self) -> bool {
        self.current_buffer_size_bytes.load(Ordering::SeqCst) >= self.config.max_buffer_size_bytes
            || self.current_event_count.load(Ordering::SeqCst) >= self.config.max_buffer_event_count
            || self.pending_flush_count.load(Ordering::SeqCst) >= self.config.max_pending_flushes
    }

    fn under_release_threshold(&self) -> bool {
        let t = self.config.release_threshold;
        let under = |current: usize, bound: usize| (current as f64) < (bound as f64) * t;
        under(
            self.current_buffer_size_bytes.load(Ordering::SeqCst),
            self.config.max_buffer_size_bytes,
        ) && under(
            self.current_event_count.load(Ordering::SeqCst),
            self.config.max_buffer_event_count,
        ) && under(
            self.pending_flush_count.load(Ordering::SeqCst),
            self.config.max_pending_flushes,
        )
    }

    /// A snapshot of current backpressure state for observability or error payloads.
    pub fn snapshot(&self) -> BackpressureSnapshot {
        let last = self.last_backpressure_at.load(Ordering::SeqCst);
        BackpressureSnapshot {
            active: self.active.load(Ordering::SeqCst),
            current_buffer_size_bytes: self.current_buffer_size_bytes.load(Ordering::SeqCst),
            current_event_count: self.current_event_count.load(Ordering::SeqCst),
            pending_flush_count: self.pending_flush_count.load(Ordering::SeqCst),
            backpressure_events: self.backpressure_events.load(Ordering::SeqCst),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::SeqCst),
            last_backpressure_at: if last == 0 { None } else { Some(last) },
        }
    }

    /// Currently buffered byte total, for observability.
    pub fn buffered_bytes(&self) -> usize {
        self.current_buffer_size_bytes.load(Ordering::SeqCst)
    }

    /// Waits until every bound is satisfied under the release threshold, honoring the
    /// configured `timeout_ms` (no timeout at all if it is `None`).
    pub async fn wait_for_capacity(&self) -> Result<(), WalError> {
        if !self.is_over_capacity() {
            return Ok(());
        }
        let start = Instant::now();
        let deadline = self.config.timeout_ms.map(Duration::from_millis);

        while self.is_over_capacity() {
            let notified = self.notify.notified();
            let wait_result = match deadline {
                Some(timeout) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        self.record_wait(start.elapsed());
                        return Err(WalError::BackpressureTimeout {
                            waited_ms: elapsed.as_millis() as u64,
                            snapshot: self.snapshot(),
                        });
                    }
                    tokio::time::timeout(timeout - elapsed, notified).await.is_ok()
                }
                None => {
                    notified.await;
                    true
                }
            };
            if !wait_result {
                self.record_wait(start.elapsed());
                return Err(WalError::BackpressureTimeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                    snapshot: self.snapshot(),
                });
            }
        }
        self.record_wait(start.elapsed());
        Ok(())
    }

    fn record_wait(&self, elapsed: Duration) {
        self.total_wait_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use doc_time::SystemProvider;

    fn controller(config: BackpressureConfig) -> BackpressureController {
        BackpressureController::new(config, Arc::new(SystemProvider))
    }

    #[tokio::test]
    async fn returns_immediately_when_under_capacity() {
        let ctrl = controller(BackpressureConfig {
            max_buffer_size_bytes: 1024,
            ..Default::default()
        });
        ctrl.reserve(100, 1);
        ctrl.wait_for_capacity().await.unwrap();
        assert!(!ctrl.snapshot().active);
    }

    #[tokio::test]
    async fn times_out_when_never_released() {
        let ctrl = controller(BackpressureConfig {
            max_buffer_size_bytes: 100,
            timeout_ms: Some(20),
            ..Default::default()
        });
        ctrl.reserve(200, 1);
        let err = ctrl.wait_for_capacity().await.unwrap_err();
        assert!(matches!(err, WalError::BackpressureTimeout { .. }));
        assert!(ctrl.snapshot().backpressure_events >= 1);
    }

    #[tokio::test]
    async fn unblocks_once_released_below_threshold() {
        let ctrl = Arc::new(controller(BackpressureConfig {
            max_buffer_size_bytes: 100,
            release_threshold: 0.5,
            timeout_ms: Some(5_000),
            ..Default::default()
        }));
        ctrl.reserve(200, 1);
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.wait_for_capacity().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Releasing down to 60 bytes keeps it over the bare bound (100) but the waiter should
        // still be blocked since it hasn't dropped under release_threshold * bound (50).
        ctrl.release(140, 0);
        assert!(!waiter.is_finished());
        ctrl.release(40, 0);
        waiter.await.unwrap().unwrap();
        assert!(!ctrl.snapshot().active);
    }

    #[tokio::test]
    async fn force_release_wakes_waiters_regardless_of_totals() {
        let ctrl = Arc::new(controller(BackpressureConfig {
            max_buffer_size_bytes: 100,
            timeout_ms: Some(5_000),
            ..Default::default()
        }));
        ctrl.reserve(200, 1);
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.wait_for_capacity().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctrl.force_release_backpressure();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn no_timeout_configured_waits_indefinitely_until_released() {
        let ctrl = Arc::new(controller(BackpressureConfig {
            max_buffer_size_bytes: 100,
            timeout_ms: None,
            ..Default::default()
        }));
        ctrl.reserve(200, 1);
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.wait_for_capacity().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctrl.release(200, 1);
        waiter.await.unwrap().unwrap();
    }
}
