//! Shared application state and the admin-controllable sync loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sl_eventlog::{DeadLetterStore, EventLogStore};
use sl_inventory::InventoryStore;
use sl_ioguard::bulkhead::Bulkhead;
use sl_lock::LeaseLockManager;
use sl_mutation::MutationService;
use sl_sync::{SyncOutcome, SyncWorker};
use sl_types::error::ApiError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::rate_limit::{LoadShedder, RateLimiter};

/// Everything a route handler needs, cloned cheaply (every field is an
/// `Arc` or `Copy`) into each request's extension set by axum's
/// `State<AppState>` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The write path.
    pub mutation: Arc<MutationService>,
    /// Admin-controllable wrapper around the fold-and-snapshot sync worker.
    pub sync: Arc<SyncController>,
    /// The durable write-ahead log, read directly for `/metrics`.
    pub eventlog: Arc<EventLogStore>,
    /// Quarantined poison events, read directly for `/metrics`.
    pub dead_letter: Arc<DeadLetterStore>,
    /// The per-store read model backing `GET` and the write path's
    /// read-modify-write.
    pub inventory: Arc<InventoryStore>,
    /// Optional cross-process lease lock, present only when
    /// `LOCKS_ENABLED=true`.
    pub lock_manager: Option<Arc<LeaseLockManager>>,
    /// Admits HTTP mutation requests ahead of the write path's own
    /// internal serialization.
    pub api_bulkhead: Arc<Bulkhead>,
    /// Process-wide token-bucket rate limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Queue-depth load shedder, gating admission ahead of the rate
    /// limiter's own per-request check.
    pub load_shedder: Arc<LoadShedder>,
    /// HTTP-level request/error counters.
    pub metrics: Arc<Metrics>,
    /// The fully-resolved configuration this instance booted with.
    pub config: Arc<ServiceConfig>,
    /// Wall-clock time this process started serving, for `/health` uptime.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// A live view of the sync loop's configuration and position, returned by
/// `GET /sync/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    /// Whether the periodic ticker is currently running.
    pub running: bool,
    /// Current tick interval, in milliseconds.
    pub interval_ms: u64,
    /// Highest event sequence folded into the central aggregate so far.
    pub cursor: u64,
}

/// Wraps [`SyncWorker`] with admin start/stop/interval control, since the
/// worker's own `run` loop is built around a single fixed interval fixed at
/// construction time. `POST /sync/start {intervalMs}` and `POST /sync/stop`
/// operate this controller; `POST /sync` calls the worker directly for a
/// single synchronous pass.
pub struct SyncController {
    worker: Arc<SyncWorker>,
    handle: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
    interval_ms: AtomicU64,
}

impl SyncController {
    /// Wrap `worker`, not yet running, ticking at `default_interval_ms`
    /// once started.
    pub fn new(worker: Arc<SyncWorker>, default_interval_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            worker,
            handle: Mutex::new(None),
            interval_ms: AtomicU64::new(default_interval_ms),
        })
    }

    /// Start the periodic ticker, replacing (and stopping) any ticker
    /// already running. `interval_ms`, if given, becomes the new cadence.
    pub async fn start(self: &Arc<Self>, interval_ms: Option<u64>) {
        if let Some(ms) = interval_ms {
            self.interval_ms.store(ms, Ordering::SeqCst);
        }
        self.stop().await;

        let shutdown = CancellationToken::new();
        let worker = self.worker.clone();
        let interval = std::time::Duration::from_millis(self.interval_ms.load(Ordering::SeqCst));
        let child_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.sync_once().await {
                            tracing::warn!(error = %e, "sync pass failed");
                        }
                    }
                    _ = child_shutdown.cancelled() => {
                        info!("admin sync ticker stopping");
                        break;
                    }
                }
            }
        });

        *self.handle.lock().await = Some((shutdown, task));
    }

    /// Stop the periodic ticker, if running. Idempotent.
    pub async fn stop(&self) {
        if let Some((shutdown, task)) = self.handle.lock().await.take() {
            shutdown.cancel();
            let _ = task.await;
        }
    }

    /// Run a single synchronous fold pass, independent of whether the
    /// periodic ticker is running.
    pub async fn trigger_once(&self) -> Result<SyncOutcome, ApiError> {
        self.worker.sync_once().await
    }

    /// A live snapshot of the controller's state, for `GET /sync/status`.
    pub async fn status(&self) -> SyncStatusView {
        SyncStatusView {
            running: self.handle.lock().await.is_some(),
            interval_ms: self.interval_ms.load(Ordering::SeqCst),
            cursor: self.worker.cursor(),
        }
    }

    /// The wrapped worker, for boot-time replay and shutdown-time final
    /// sync.
    pub fn worker(&self) -> &Arc<SyncWorker> {
        &self.worker
    }
}
