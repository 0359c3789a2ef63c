//! Injectable clock so every TTL/expiry decision can be frozen in tests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of wall-clock time.
///
/// Every component that makes a TTL or expiry decision (idempotency entries,
/// lease leases, circuit breaker cooldowns) takes `Arc<dyn Clock>` rather
/// than calling `Utc::now()` directly, so tests can freeze time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used in tests that assert
/// TTL/expiry edges without racing real time.
#[derive(Debug)]
pub struct FrozenClock {
    millis: AtomicI64,
}

impl FrozenClock {
    /// Create a frozen clock starting at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Advance the frozen clock by `delta_ms` milliseconds.
    pub fn advance_millis(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(ms).expect("frozen clock millis always in range")
    }
}
