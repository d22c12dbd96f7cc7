//! Bounded, cancelable retry for OCC-conflicting operations (spec §4.E `with_retry`).
//!
//! Shaped after `backoff::Backoff::retry_with_backoff` (loop, sleep, retry) but with the spec's
//! specific knobs: a hard retry ceiling, a caller-supplied retryability predicate, an
//! `on_retry` veto hook, and optional metrics — none of which the generic `backoff` crate
//! exposes, so this is its own small loop rather than a wrapper around it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dberror::DbError;
use observability_deps::tracing::debug;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Configuration for [`with_retry`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (so `max_retries + 1` attempts total).
    pub max_retries: u32,
    /// Base delay; the delay before retry `n` (1-indexed) is `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
    /// Whether to randomize each computed delay (uniformly in `[0.5, 1.5) × delay`).
    pub jitter: bool,
    /// Predicate deciding whether an error should be retried at all.
    pub is_retryable: Arc<dyn Fn(&DbError) -> bool + Send + Sync>,
    /// Optional veto called before each retry with `(retry_number, error)`; returning `false`
    /// cancels further retries immediately.
    pub on_retry: Option<Arc<dyn Fn(u32, &DbError) -> bool + Send + Sync>>,
    /// Whether [`with_retry`] should populate [`RetryOutcome::metrics`].
    pub return_metrics: bool,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("jitter", &self.jitter)
            .field("return_metrics", &self.return_metrics)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            jitter: true,
            is_retryable: Arc::new(DbError::is_retryable),
            on_retry: None,
            return_metrics: false,
        }
    }
}

/// Cumulative counters for one [`with_retry`] call (spec §4.E "Metrics (attempts, retries,
/// succeeded, errors)").
#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// Number of retries actually performed (`attempts - 1`, assuming at least one attempt).
    pub retries: u32,
    /// Whether the final attempt succeeded.
    pub succeeded: bool,
    /// Every error encountered, in attempt order.
    pub errors: Vec<DbError>,
}

/// The result of a [`with_retry`] call.
pub struct RetryOutcome<T> {
    /// The final result: `Ok` from the attempt that succeeded, or the last error if every
    /// attempt (or an `on_retry` veto / cancellation) ended the loop without success.
    pub result: Result<T, DbError>,
    /// Present only when `RetryConfig::return_metrics` was set.
    pub metrics: Option<RetryMetrics>,
}

/// Retries `op` per `config`, doubling the delay each time, until it succeeds, exhausts
/// `max_retries`, is vetoed by `on_retry`, hits a non-retryable error, or `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    config: RetryConfig,
    cancel: &CancellationToken,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempts = 0u32;
    let mut retries = 0u32;
    let mut errors = Vec::new();

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    metrics: config.return_metrics.then(|| RetryMetrics {
                        attempts,
                        retries,
                        succeeded: true,
                        errors,
                    }),
                };
            }
            Err(err) => {
                let retryable = (config.is_retryable)(&err);
                errors.push(err.clone());

                if !retryable || retries >= config.max_retries {
                    return finish_with_failure(attempts, retries, errors, config.return_metrics);
                }
                if let Some(on_retry) = &config.on_retry {
                    if !on_retry(retries + 1, &err) {
                        return finish_with_failure(attempts, retries, errors, config.return_metrics);
                    }
                }

                let delay = delay_for(config.base_delay, retries, config.jitter);
                retries += 1;
                debug!(attempts, retries, delay_ms = delay.as_millis() as u64, "OCC retry backing off");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return finish_with_failure(attempts, retries, errors, config.return_metrics);
                    }
                }
            }
        }
    }
}

fn finish_with_failure<T>(
    attempts: u32,
    retries: u32,
    errors: Vec<DbError>,
    return_metrics: bool,
) -> RetryOutcome<T> {
    let last = errors.last().expect("at least one error was recorded").clone();
    RetryOutcome {
        result: Err(last),
        metrics: return_metrics.then(|| RetryMetrics {
            attempts,
            retries,
            succeeded: false,
            errors,
        }),
    }
}

fn delay_for(base_delay: Duration, retry_index: u32, jitter: bool) -> Duration {
    let exponent = retry_index.min(20); // guard against overflow on pathological configs
    let delay = base_delay.saturating_mul(1u32 << exponent);
    if jitter {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dberror::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try_without_retrying() {
        let cancel = CancellationToken::new();
        let outcome: RetryOutcome<i32> = with_retry(
            || async { Ok(42) },
            RetryConfig { return_metrics: true, ..Default::default() },
            &cancel,
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        let metrics = outcome.metrics.unwrap();
        assert_eq!(metrics.attempts, 1);
        assert_eq!(metrics.retries, 0);
        assert!(metrics.succeeded);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let outcome: RetryOutcome<i32> = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DbError::new(ErrorCode::VersionConflict, "stale"))
                    } else {
                        Ok(7)
                    }
                }
            },
            RetryConfig {
                base_delay: Duration::from_millis(1),
                jitter: false,
                return_metrics: true,
                ..Default::default()
            },
            &cancel,
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.metrics.unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let outcome: RetryOutcome<i32> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::new(ErrorCode::ValidationFailed, "bad input")) }
            },
            RetryConfig {
                base_delay: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
            &cancel,
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<i32> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::new(ErrorCode::EtagMismatch, "conflict")) }
            },
            RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                jitter: false,
                return_metrics: true,
                ..Default::default()
            },
            &cancel,
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
        assert_eq!(outcome.metrics.unwrap().retries, 2);
    }

    #[tokio::test]
    async fn on_retry_veto_stops_retrying_early() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<i32> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::new(ErrorCode::VersionConflict, "stale")) }
            },
            RetryConfig {
                max_retries: 10,
                base_delay: Duration::from_millis(1),
                jitter: false,
                on_retry: Some(Arc::new(|retry_number, _err| retry_number < 2)),
                ..Default::default()
            },
            &cancel,
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<i32> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::new(ErrorCode::VersionConflict, "stale")) }
            },
            RetryConfig {
                base_delay: Duration::from_millis(50),
                jitter: false,
                ..Default::default()
            },
            &cancel,
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
