//! Global token-bucket rate limiter and queue-depth load shedder.
//!
//! The refill/consume arithmetic mirrors `TokenBucketState` from the
//! security crates in the wider workspace this service grew out of: tokens
//! accumulate at `refill_rate` per second up to `capacity`, a request
//! consumes one token, and a request that finds the bucket empty is
//! rejected with the time until a token would next be available. Unlike
//! that implementation this bucket is a single process-wide gate rather
//! than one keyed per client — spec has no notion of a client identity to
//! key on.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use sl_types::clock::Clock;
use sl_types::error::ApiError;
use std::sync::Arc;

/// A single process-wide token bucket guarding the HTTP mutation surface.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    tokens_milli: AtomicI64,
    last_refill_ms: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Build a bucket starting full, refilling at `refill_rate_per_sec` up
    /// to `capacity`.
    pub fn new(capacity: u32, refill_rate_per_sec: u32, clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate_per_sec as f64,
            tokens_milli: AtomicI64::new((capacity as f64 * 1000.0) as i64),
            last_refill_ms: AtomicI64::new(now_ms),
            clock,
        }
    }

    /// Refill, then attempt to consume one token. `Ok(())` on success,
    /// `Err(ApiError::RateLimited)` carrying the millisecond wait otherwise.
    pub fn check(&self) -> Result<(), ApiError> {
        let now_ms = self.clock.now().timestamp_millis();
        let last_ms = self.last_refill_ms.swap(now_ms, Ordering::SeqCst);
        let elapsed_seconds = (now_ms - last_ms).max(0) as f64 / 1000.0;
        let refill_milli = (elapsed_seconds * self.refill_rate * 1000.0) as i64;
        let capacity_milli = (self.capacity * 1000.0) as i64;

        let previous = self
            .tokens_milli
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some((t + refill_milli).min(capacity_milli)))
            .expect("closure always returns Some");
        let tokens_milli = (previous + refill_milli).min(capacity_milli);

        if tokens_milli >= 1000 {
            self.tokens_milli.fetch_sub(1000, Ordering::SeqCst);
            Ok(())
        } else {
            let tokens_short = 1000 - tokens_milli;
            let wait_ms = if self.refill_rate > 0.0 {
                (tokens_short as f64 / 1000.0 / self.refill_rate * 1000.0).ceil() as u64
            } else {
                u64::MAX
            };
            Err(ApiError::RateLimited { retry_after_ms: wait_ms })
        }
    }
}

/// Rejects requests outright once the number of in-flight-plus-admitted
/// requests exceeds `queue_max`, independent of (and ahead of) the
/// bulkhead's own narrower concurrency admission.
pub struct LoadShedder {
    depth: AtomicUsize,
    queue_max: usize,
}

/// RAII guard: decrements the shedder's depth counter on drop so a panic or
/// early return still releases the slot.
pub struct ShedGuard<'a> {
    shedder: &'a LoadShedder,
}

impl Drop for ShedGuard<'_> {
    fn drop(&mut self) {
        self.shedder.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LoadShedder {
    /// Build a shedder that rejects once depth exceeds `queue_max`.
    pub fn new(queue_max: usize) -> Self {
        Self { depth: AtomicUsize::new(0), queue_max }
    }

    /// Admit one request, returning a guard that releases its slot on drop,
    /// or `LoadShed` if the queue is already at capacity.
    pub fn enter(&self) -> Result<ShedGuard<'_>, ApiError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.queue_max {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(ApiError::LoadShed);
        }
        Ok(ShedGuard { shedder: self })
    }

    /// Current in-flight-plus-admitted depth, for `/metrics`.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::clock::FrozenClock;

    #[test]
    fn consumes_up_to_capacity_then_rejects() {
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let limiter = RateLimiter::new(2, 10, clock);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        let err = limiter.check().unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
    }

    #[test]
    fn refills_over_time() {
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let limiter = RateLimiter::new(1, 10, clock.clone());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
        clock.advance_millis(200);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn load_shedder_rejects_past_queue_max() {
        let shedder = LoadShedder::new(1);
        let _first = shedder.enter().unwrap();
        let second = shedder.enter();
        assert!(matches!(second, Err(ApiError::LoadShed)));
    }

    #[test]
    fn load_shedder_releases_slot_on_drop() {
        let shedder = LoadShedder::new(1);
        {
            let _first = shedder.enter().unwrap();
        }
        assert!(shedder.enter().is_ok());
    }
}
