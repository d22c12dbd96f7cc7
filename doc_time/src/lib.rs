//! Time functionality for the crate.
//!
//! Mirrors the teacher's `iox_time` crate: a small [`TimeProvider`] trait abstracts "now" so
//! tests can pin the clock, plus a ULID generator for entity/event ids (spec §3, §6).
#![warn(missing_docs)]

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

/// Milliseconds since the Unix epoch.
pub type MillisSinceEpoch = i64;

/// Abstracts the wall clock so callers can substitute a deterministic clock in tests.
pub trait TimeProvider: fmt::Debug + Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time in milliseconds since the epoch.
    fn now_millis(&self) -> MillisSinceEpoch {
        self.now().timestamp_millis()
    }
}

/// Real wall-clock time provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl TimeProvider for SystemProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A deterministic clock for tests: starts at a fixed instant and only advances when told to.
#[derive(Debug)]
pub struct MockProvider {
    millis: AtomicI64,
}

impl MockProvider {
    /// Create a mock clock pinned at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Advance the clock by `delta_millis` and return the new time.
    pub fn inc(&self, delta_millis: i64) -> DateTime<Utc> {
        let new = self.millis.fetch_add(delta_millis, Ordering::SeqCst) + delta_millis;
        Utc.timestamp_millis_opt(new).unwrap()
    }

    /// Pin the clock to an exact time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .unwrap()
    }
}

/// Shared handle to a [`TimeProvider`].
pub type TimeProviderRef = Arc<dyn TimeProvider>;

/// Monotonic, lexically sortable id generator (ULID, spec §3 "Event.id", §6 "Entity id form").
///
/// Wraps the `ulid` crate's monotonic generator behind a mutex so concurrent callers within one
/// process still get strictly increasing ids even when `now()` repeats within the same
/// millisecond (the `ulid` crate's `Generator` bumps the random component in that case).
pub struct IdGenerator {
    inner: Mutex<ulid::Generator>,
    time: TimeProviderRef,
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

impl IdGenerator {
    /// Create a generator driven by `time`.
    pub fn new(time: TimeProviderRef) -> Self {
        Self {
            inner: Mutex::new(ulid::Generator::new()),
            time,
        }
    }

    /// Generate the next id as a lowercase 26-character ULID string (spec §6: "lowercase
    /// ULID-style string").
    pub fn next(&self) -> String {
        let now = self.time.now();
        let mut gen = self.inner.lock();
        let ulid = loop {
            match gen.generate_from_datetime(now) {
                Ok(id) => break id,
                Err(_) => continue,
            }
        };
        ulid.to_string().to_lowercase()
    }
}

/// Parse a ULID string back into its timestamp component, in milliseconds since the epoch.
pub fn ulid_timestamp_millis(id: &str) -> Option<MillisSinceEpoch> {
    Ulid::from_string(id).ok().map(|u| u.timestamp_ms() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mock_provider_advances_monotonically() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = MockProvider::new(start);
        assert_eq!(clock.now(), start);
        clock.inc(1_000);
        assert_eq!(clock.now(), start + chrono::Duration::seconds(1));
    }

    #[test]
    fn ids_are_sortable_and_lowercase() {
        let clock: TimeProviderRef = Arc::new(SystemProvider);
        let gen = IdGenerator::new(clock);
        let a = gen.next();
        let b = gen.next();
        assert_eq!(a.len(), 26);
        assert_eq!(a, a.to_lowercase());
        assert!(a <= b, "ids should be non-decreasing: {a} vs {b}");
    }

    #[test]
    fn ulid_round_trips_timestamp() {
        let clock = Arc::new(MockProvider::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()));
        let expected_ms = clock.now_millis();
        let gen = IdGenerator::new(clock);
        let id = gen.next();
        assert_eq!(ulid_timestamp_millis(&id), Some(expected_ms));
    }
}
