//! Process-wide HTTP counters surfaced at `/metrics`, alongside live stats
//! pulled directly from each collaborator at request time.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Request/error counters. Per-kind error counts are keyed by
/// `ApiError::code()` so a new error variant shows up without a code
/// change here.
#[derive(Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    errors_by_code: DashMap<&'static str, u64>,
}

impl Metrics {
    /// Construct an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed HTTP request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one request that ended in `code` (an `ApiError::code()`).
    pub fn record_error(&self, code: &'static str) {
        *self.errors_by_code.entry(code).or_insert(0) += 1;
    }

    /// Total requests observed since process start.
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Snapshot of error counts by `ApiError::code()`.
    pub fn errors_by_code(&self) -> std::collections::HashMap<String, u64> {
        self.errors_by_code.iter().map(|e| (e.key().to_string(), *e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_and_errors_by_code() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_error("CONFLICT");
        metrics.record_error("CONFLICT");
        metrics.record_error("NOT_FOUND");

        assert_eq!(metrics.requests_total(), 2);
        let by_code = metrics.errors_by_code();
        assert_eq!(by_code.get("CONFLICT"), Some(&2));
        assert_eq!(by_code.get("NOT_FOUND"), Some(&1));
    }
}
