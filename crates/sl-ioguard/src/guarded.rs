//! `GuardedFs`: atomic JSON file I/O composed with a bulkhead, a circuit
//! breaker, and retry-with-jitter, in that order, per spec §4.1.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use sl_types::clock::Clock;
use sl_types::jitter::Jitter;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::bulkhead::{Bulkhead, BulkheadStats};
use crate::error::IoGuardError;
use crate::fsops;
use crate::retry::{with_retry, RetryConfig};

/// One logical I/O pool: a bulkhead, a circuit breaker, and a retry policy
/// guarding a family of filesystem operations.
///
/// Spec §5 requires locks to never be I/O-blocked by the general
/// filesystem pool, so the lease lock constructs its own `GuardedFs`
/// instance distinct from the one shared by the event log, inventory
/// store, and snapshotter.
pub struct GuardedFs {
    bulkhead: Arc<Bulkhead>,
    breaker: Arc<CircuitBreaker>,
    retry_config: RetryConfig,
    jitter: Arc<dyn Jitter>,
}

impl GuardedFs {
    /// Build a guarded filesystem facade.
    pub fn new(
        name: &str,
        concurrency_limit: usize,
        queue_size: usize,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
        breaker_timeout: Option<Duration>,
        retry_config: RetryConfig,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
    ) -> Self {
        Self {
            bulkhead: Bulkhead::new(name, concurrency_limit, queue_size),
            breaker: CircuitBreaker::new(
                name,
                BreakerConfig {
                    failure_threshold: breaker_threshold,
                    cooldown: breaker_cooldown,
                    timeout: breaker_timeout,
                },
                clock,
            ),
            retry_config,
            jitter,
        }
    }

    /// Read and parse a JSON file through bulkhead → breaker → retry.
    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, IoGuardError> {
        self.guarded("read_json", || fsops::read_json(path)).await
    }

    /// Atomically write a JSON file through bulkhead → breaker → retry.
    pub async fn write_json_atomic<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), IoGuardError> {
        self.guarded("write_json_atomic", || fsops::write_json_atomic(path, value)).await
    }

    /// Non-atomic JSON write through bulkhead → breaker → retry.
    pub async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), IoGuardError> {
        self.guarded("write_json", || fsops::write_json(path, value)).await
    }

    /// Delete a file (missing is not an error) through bulkhead → breaker → retry.
    pub async fn delete_file(&self, path: &Path) -> Result<(), IoGuardError> {
        self.guarded("delete_file", || fsops::delete_file(path)).await
    }

    /// Create a directory (and parents) through bulkhead → breaker → retry.
    pub async fn ensure_dir(&self, path: &Path) -> Result<(), IoGuardError> {
        self.guarded("ensure_dir", || fsops::ensure_dir(path)).await
    }

    async fn guarded<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, IoGuardError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, IoGuardError>>,
    {
        let retry_config = self.retry_config;
        let jitter = self.jitter.clone();
        self.bulkhead
            .run(|| {
                let op = &op;
                let jitter = &jitter;
                self.breaker.call(move || with_retry(op_name, retry_config, jitter, || op()))
            })
            .await
    }

    /// Current bulkhead occupancy, for `/metrics`.
    pub fn bulkhead_stats(&self) -> BulkheadStats {
        self.bulkhead.stats()
    }

    /// Whether the breaker is currently open, for `/metrics`.
    pub async fn breaker_open(&self) -> bool {
        self.breaker.is_open().await
    }
}
