#![forbid(unsafe_code)]

//! **sl-service** – the StockLedger HTTP service: axum adapter,
//! configuration, rate limiting, and process lifecycle. The binary
//! (`src/main.rs`) is a thin wrapper around [`build_state`] and
//! [`routes::build_router`]; both are exposed here so integration tests can
//! drive the full HTTP surface without a bound TCP listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use sl_eventlog::{DeadLetterStore, EventLogStore};
use sl_idempotency::IdempotencyStore;
use sl_inventory::InventoryStore;
use sl_ioguard::breaker::{BreakerConfig, CircuitBreaker};
use sl_ioguard::bulkhead::Bulkhead;
use sl_ioguard::guarded::GuardedFs;
use sl_ioguard::retry::RetryConfig;
use sl_lock::LeaseLockManager;
use sl_mutation::{MutationConfig, MutationService};
use sl_serializer::KeySerializer;
use sl_sync::{Snapshotter, SyncConfig, SyncWorker};
use sl_types::clock::{Clock, SystemClock};
use sl_types::jitter::RandJitter;

pub mod config;
pub mod error_response;
pub mod lifecycle;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
use metrics::Metrics;
use rate_limit::{LoadShedder, RateLimiter};
pub use state::{AppState, SyncController};

/// Assemble every collaborator in dependency order and wire them into
/// [`AppState`]. Per spec §5, the lease lock gets its own `GuardedFs` pool
/// distinct from the general one shared by the event log, inventory store,
/// and snapshotter, so lock operations are never I/O-blocked by the rest of
/// the filesystem traffic.
pub async fn build_state(config: &ServiceConfig) -> Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jitter = Arc::new(RandJitter);

    tokio::fs::create_dir_all(&config.data_dir).await.ok();
    tokio::fs::create_dir_all(config.snapshots_dir()).await.ok();
    if config.locks_enabled {
        tokio::fs::create_dir_all(config.lock_dir_path()).await.ok();
    }

    let retry_config = RetryConfig {
        base_delay_ms: config.retry_base_ms,
        times: config.retry_times,
        jitter_ms: config.retry_jitter_ms,
    };

    let general_fs = |name: &str| {
        GuardedFs::new(
            name,
            config.concurrency_sync.max(config.concurrency_api),
            config.concurrency_sync.max(config.concurrency_api) * 4,
            config.breaker_failure_threshold(),
            config.breaker_cooldown,
            Some(Duration::from_secs(5)),
            retry_config.clone(),
            clock.clone(),
            jitter.clone(),
        )
    };

    let event_log = EventLogStore::load(config.event_log_path(), general_fs("event-log")).await?;
    let dead_letter = DeadLetterStore::load(config.dead_letter_path(), general_fs("dead-letter")).await?;
    let inventory = InventoryStore::load(config.inventory_path(), general_fs("inventory")).await?;
    let snapshotter = Arc::new(Snapshotter::new(config.snapshots_dir(), general_fs("snapshots")));

    let idempotency = IdempotencyStore::new(clock.clone());
    idempotency.spawn_sweeper(Duration::from_millis(config.idemp_ttl_ms.max(1000)));
    let serializer = KeySerializer::new();

    let lock_manager = if config.locks_enabled {
        let lock_fs = GuardedFs::new(
            "lease-lock",
            config.concurrency_api,
            config.concurrency_api * 4,
            config.breaker_failure_threshold(),
            config.breaker_cooldown,
            Some(Duration::from_secs(5)),
            retry_config.clone(),
            clock.clone(),
            jitter.clone(),
        );
        Some(LeaseLockManager::new(config.lock_dir_path(), lock_fs, clock.clone()))
    } else {
        None
    };

    let mutation = MutationService::new(
        event_log.clone(),
        inventory.clone(),
        idempotency.clone(),
        serializer.clone(),
        lock_manager.clone(),
        clock.clone(),
        MutationConfig {
            locks_enabled: config.locks_enabled,
            lock_ttl_ms: config.lock_ttl_ms,
            lock_retry_after_ms: config.lock_retry_after_ms,
            lock_owner_id: config.lock_owner_id.clone(),
            idemp_ttl_ms: config.idemp_ttl_ms,
        },
    );

    let sync_breaker = CircuitBreaker::new(
        "sync",
        BreakerConfig {
            failure_threshold: config.breaker_failure_threshold(),
            cooldown: config.breaker_cooldown,
            timeout: Some(Duration::from_secs(30)),
        },
        clock.clone(),
    );
    let sync_worker = SyncWorker::new(
        event_log.clone(),
        dead_letter.clone(),
        snapshotter,
        config.central_inventory_path(),
        general_fs("central-inventory"),
        config.concurrency_sync,
        sync_breaker,
        clock.clone(),
        SyncConfig {
            interval: Duration::from_millis(config.sync_interval_ms),
            max_retries: config.sync_max_retries,
            snapshot_every_n_events: config.snapshot_every_n_events,
            snapshot_keep_count: config.snapshot_keep_count,
        },
    )
    .await?;
    let sync = SyncController::new(sync_worker, config.sync_interval_ms);

    let api_bulkhead = Bulkhead::new("api", config.concurrency_api, config.concurrency_api * 4);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_burst, config.rate_limit_rps, clock.clone()));
    let load_shedder = Arc::new(LoadShedder::new(config.load_shed_queue_max));
    let metrics = Arc::new(Metrics::new());

    Ok(AppState {
        mutation,
        sync,
        eventlog: event_log,
        dead_letter,
        inventory,
        lock_manager,
        api_bulkhead,
        rate_limiter,
        load_shedder,
        metrics,
        config: Arc::new(config.clone()),
        started_at: chrono::Utc::now(),
    })
}

/// Run `state`'s boot-time replay, per spec: rebuild the central aggregate
/// from its latest snapshot (if any) and fold anything newer.
pub async fn replay_on_boot(state: &AppState) -> Result<()> {
    state.sync.worker().replay_on_boot().await.context("failed to replay central aggregate on boot")
}
