//! Bounded concurrency pool with a bounded FIFO wait queue.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::IoGuardError;

/// Point-in-time bulkhead occupancy, for `/metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkheadStats {
    /// Number of executions currently in flight.
    pub active: usize,
    /// Number of callers parked in the wait queue.
    pub queued: usize,
    /// Total executions that have completed (success or failure) so far.
    pub completed: u64,
}

/// A bounded concurrency pool: at most `limit` executions in flight, up to
/// `queue_size` further callers park FIFO, beyond that callers fail fast
/// with [`IoGuardError::Saturated`].
///
/// Backed by a single [`tokio::sync::Semaphore`]: admission beyond
/// `limit + queue_size` is rejected before ever touching the semaphore, so
/// FIFO ordering among admitted waiters comes from the semaphore's own fair
/// wake order.
pub struct Bulkhead {
    name: String,
    limit: usize,
    queue_size: usize,
    semaphore: Semaphore,
    admitted: AtomicU64,
    completed: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead with the given name, concurrency `limit`, and
    /// `queue_size` of additional parked callers.
    pub fn new(name: impl Into<String>, limit: usize, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            limit,
            queue_size,
            semaphore: Semaphore::new(limit),
            admitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })
    }

    /// Run `fn_` under this bulkhead's admission control.
    ///
    /// Errors from `fn_` propagate unchanged; completing (successfully or
    /// not) always releases the permit, which wakes the oldest queued
    /// caller.
    pub async fn run<T, E, F, Fut>(&self, fn_: F) -> Result<T, IoGuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<IoGuardError>,
    {
        let in_flight_and_queued = self.admitted.fetch_add(1, Ordering::SeqCst) + 1
            - self.completed.load(Ordering::SeqCst);
        if in_flight_and_queued as usize > self.limit + self.queue_size {
            self.admitted.fetch_sub(1, Ordering::SeqCst);
            return Err(IoGuardError::Saturated {
                name: self.name.clone(),
            });
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("bulkhead semaphore is never closed");

        let result = fn_().await;
        drop(permit);
        self.completed.fetch_add(1, Ordering::SeqCst);

        result.map_err(Into::into)
    }

    /// Current occupancy snapshot for observability.
    pub fn stats(&self) -> BulkheadStats {
        let admitted = self.admitted.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        let in_flight_and_queued = admitted.saturating_sub(completed) as usize;
        let active = in_flight_and_queued.min(self.limit);
        let queued = in_flight_and_queued.saturating_sub(active);
        BulkheadStats {
            active,
            queued,
            completed,
        }
    }

    /// The bulkhead's name, as reported in `Saturated` errors.
    pub fn name(&self) -> &str {
        &self.name
    }
}
