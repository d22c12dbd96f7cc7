//! Shared test scaffolding used by every crate's `#[cfg(test)]` modules.
#![warn(missing_docs)]

use once_cell::sync::OnceCell;
use tempfile::TempDir;

static TRACING: OnceCell<()> = OnceCell::new();

/// Initialize a `tracing` subscriber for the current test process, once. Controlled by
/// `RUST_LOG` the same way production logging is (spec §6), defaulting to `debug` so test
/// failures come with useful context.
pub fn maybe_start_logging() {
    TRACING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Create a fresh temporary directory for a filesystem-backed storage test. Removed on drop.
pub fn tmp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("docdb-test-")
        .tempdir()
        .expect("failed to create temp dir")
}

#[cfg(feature = "future_timeout")]
mod timeout {
    use std::future::Future;
    use std::time::Duration;

    /// Run `fut`, panicking if it doesn't complete within `duration`. Useful for asserting that
    /// backpressure waits actually release rather than hanging forever (spec §4.D S4).
    pub async fn with_timeout<F, O>(duration: Duration, fut: F) -> O
    where
        F: Future<Output = O>,
    {
        tokio::time::timeout(duration, fut)
            .await
            .expect("future did not complete within timeout")
    }
}

#[cfg(feature = "future_timeout")]
pub use timeout::with_timeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_dir_exists_and_is_empty() {
        let dir = tmp_dir();
        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
