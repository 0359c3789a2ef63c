#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-idempotency** – Request-key idempotency cache.
//!
//! Backed by a `dashmap::DashMap`, the same concurrent-map idiom used for
//! process-wide registries throughout the Toka workspace. Two requests with
//! the same `Idempotency-Key` and an equal payload fingerprint return the
//! same cached result; a reused key with a different fingerprint is a
//! conflict.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use serde_json::Value;
use sl_types::clock::Clock;
use sl_types::idempotency::{canonical_fingerprint, IdempotencyEntry, IdempotencyStatus};
use tracing::debug;

/// The outcome of consulting the idempotency store before doing any work.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// No entry exists yet (or it expired) — proceed with the operation.
    Miss,
    /// An unexpired entry with a matching fingerprint exists — replay it.
    Hit {
        /// The cached result to return verbatim.
        cached_result: Option<Value>,
        /// The entry's lifecycle state at the time of the hit.
        status: IdempotencyStatus,
    },
    /// An unexpired entry exists but its fingerprint differs from the
    /// incoming payload.
    Conflict,
}

/// The process-wide idempotency cache.
pub struct IdempotencyStore {
    entries: DashMap<String, IdempotencyEntry>,
    clock: Arc<dyn Clock>,
}

impl IdempotencyStore {
    /// Construct an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            clock,
        })
    }

    /// Consult the cache for `key` against the canonical fingerprint of
    /// `payload`. Opportunistically evicts the entry if it has expired,
    /// mirroring the `isLocked`-style "read triggers cleanup" behavior
    /// spec §9 calls out for the lease lock.
    pub fn check(&self, key: &str, payload: &Value) -> CheckOutcome {
        let fingerprint = canonical_fingerprint(payload);
        let now = self.clock.now();

        let Some(entry) = self.entries.get(key) else {
            return CheckOutcome::Miss;
        };

        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove(key);
            return CheckOutcome::Miss;
        }

        if entry.payload_fingerprint != fingerprint {
            return CheckOutcome::Conflict;
        }

        CheckOutcome::Hit {
            cached_result: entry.cached_result.clone(),
            status: entry.status,
        }
    }

    /// Record (or overwrite) the cache entry for `key`.
    ///
    /// `status` must only be set to `Completed` once the work it
    /// represents has actually committed — `set` never infers completion
    /// on the caller's behalf.
    pub fn set(
        &self,
        key: &str,
        payload: &Value,
        cached_result: Option<Value>,
        status: IdempotencyStatus,
        ttl_ms: u64,
    ) {
        let now = self.clock.now();
        let expires_at = now + ChronoDuration::milliseconds(ttl_ms as i64);
        let entry = IdempotencyEntry {
            request_key: key.to_string(),
            payload_fingerprint: canonical_fingerprint(payload),
            cached_result,
            status,
            expires_at,
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove every entry whose `expires_at` has passed. Intended to be
    /// driven by a background sweep task on an interval.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Number of live (not necessarily unexpired) entries, for `/metrics`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a background task that sweeps expired entries on `interval`.
    /// The returned handle aborts the task when dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired idempotency entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sl_types::clock::FrozenClock;

    #[test]
    fn miss_then_hit_on_matching_fingerprint() {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let store = IdempotencyStore::new(clock);
        let payload = json!({"delta": 5});

        assert!(matches!(store.check("K", &payload), CheckOutcome::Miss));

        store.set("K", &payload, Some(json!({"newQuantity": 105})), IdempotencyStatus::Completed, 300_000);

        match store.check("K", &payload) {
            CheckOutcome::Hit { cached_result, status } => {
                assert_eq!(cached_result, Some(json!({"newQuantity": 105})));
                assert_eq!(status, IdempotencyStatus::Completed);
            }
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[test]
    fn conflict_on_mismatched_fingerprint() {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let store = IdempotencyStore::new(clock);
        store.set("K", &json!({"delta": 5}), Some(json!({})), IdempotencyStatus::Completed, 300_000);

        assert!(matches!(store.check("K", &json!({"delta": 6})), CheckOutcome::Conflict));
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_evicted() {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let store = IdempotencyStore::new(clock.clone());
        let payload = json!({"delta": 5});
        store.set("K", &payload, Some(json!({})), IdempotencyStatus::Completed, 1000);

        clock.advance_millis(2000);
        assert!(matches!(store.check("K", &payload), CheckOutcome::Miss));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn sweep_expired_removes_only_expired_entries() {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let store = IdempotencyStore::new(clock.clone());
        store.set("A", &json!({}), None, IdempotencyStatus::Pending, 1000);
        store.set("B", &json!({}), None, IdempotencyStatus::Pending, 10_000);

        clock.advance_millis(5000);
        let removed = store.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }
}
