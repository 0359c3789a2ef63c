//! The sync worker: folds unapplied events into the central aggregate on a
//! timer, retrying failures and quarantining poison events to the DLQ.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sl_eventlog::{move_to_dead_letter, DeadLetterStore, EventLogStore};
use sl_ioguard::breaker::CircuitBreaker;
use sl_ioguard::bulkhead::Bulkhead;
use sl_ioguard::error::IoGuardError;
use sl_ioguard::guarded::GuardedFs;
use sl_types::clock::Clock;
use sl_types::error::ApiError;
use sl_types::event::{Event, Sequence};
use sl_types::snapshot::CentralInventory;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::snapshotter::{apply_event, Snapshotter};

/// On-disk shape of `central-inventory.json`. The cursor travels with the
/// aggregate so a restart before the next snapshot resumes folding from the
/// right place instead of re-applying (and failing stale-version checks on)
/// events already reflected in `aggregate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CentralFile {
    cursor: Sequence,
    aggregate: CentralInventory,
}

/// Tunables governing sync cadence and DLQ policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often `sync_once` fires when run via [`SyncWorker::run`].
    pub interval: Duration,
    /// Failures an event may accumulate before being moved to the DLQ.
    pub max_retries: u32,
    /// Cadence (in folded events) at which a snapshot is taken.
    pub snapshot_every_n_events: usize,
    /// Snapshots to retain after compaction.
    pub snapshot_keep_count: usize,
}

/// Outcome of one `sync_once` pass, surfaced for logging and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    /// Events successfully folded into the aggregate.
    pub applied: usize,
    /// Events that failed and were quarantined to the DLQ this pass.
    pub dead_lettered: usize,
    /// Highest sequence now reflected in the aggregate.
    pub cursor: Sequence,
}

/// Processes events the central aggregate hasn't yet absorbed, in
/// `sequence` order, on an independent timer from the write path.
pub struct SyncWorker {
    event_log: Arc<EventLogStore>,
    dlq: Arc<DeadLetterStore>,
    snapshotter: Arc<Snapshotter>,
    central: RwLock<CentralInventory>,
    central_path: PathBuf,
    fs: GuardedFs,
    last_applied_sequence: AtomicU64,
    bulkhead: Arc<Bulkhead>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl SyncWorker {
    /// Assemble the sync worker. `central_path`/`fs` persist the folded
    /// aggregate, alongside its cursor, to `data/central-inventory.json` —
    /// the cursor must travel with the aggregate on disk, or a restart with
    /// no snapshot yet taken would re-fold already-applied events against
    /// a `last_applied_sequence` that reset to zero.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        event_log: Arc<EventLogStore>,
        dlq: Arc<DeadLetterStore>,
        snapshotter: Arc<Snapshotter>,
        central_path: PathBuf,
        fs: GuardedFs,
        concurrency_limit: usize,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Arc<Self>, ApiError> {
        let loaded = match fs.read_json::<CentralFile>(&central_path).await {
            Ok(file) => file,
            Err(_) => CentralFile::default(),
        };
        Ok(Arc::new(Self {
            event_log,
            dlq,
            snapshotter,
            central: RwLock::new(loaded.aggregate),
            central_path,
            fs,
            last_applied_sequence: AtomicU64::new(loaded.cursor),
            bulkhead: Bulkhead::new("sync", concurrency_limit, concurrency_limit * 4),
            breaker,
            clock,
            config,
        }))
    }

    /// Reconstruct the aggregate from the latest snapshot (if any),
    /// replaying its tail, then run one full `sync_once` to pick up
    /// anything newer. Called once at startup.
    pub async fn replay_on_boot(&self) -> Result<(), ApiError> {
        if let Some(snapshot) = self.snapshotter.get_latest_snapshot().await? {
            let tail = self.event_log.get_after_sequence(snapshot.sequence).await;
            let rebuilt = self.snapshotter.replay_from_snapshot(&snapshot, &tail);
            *self.central.write().await = rebuilt;
            self.last_applied_sequence.store(snapshot.sequence, Ordering::SeqCst);
            info!(sequence = snapshot.sequence, "rebuilt central aggregate from snapshot");
        }
        self.sync_once().await?;
        Ok(())
    }

    /// Run one sync pass through the bulkhead and breaker, per spec:
    /// `breaker.call(|| bulkhead.run(|| sync_once_inner()))`.
    pub async fn sync_once(&self) -> Result<SyncOutcome, ApiError> {
        let bulkhead = self.bulkhead.clone();
        self.breaker
            .call(|| bulkhead.run(|| async { self.sync_once_inner().await.map_err(to_io_guard_error) }))
            .await
            .map_err(ApiError::from)
    }

    async fn sync_once_inner(&self) -> Result<SyncOutcome, ApiError> {
        let cursor = self.last_applied_sequence.load(Ordering::SeqCst);
        let pending = self.event_log.get_after_sequence(cursor).await;
        if pending.is_empty() {
            return Ok(SyncOutcome { cursor, ..Default::default() });
        }

        let mut applied = 0usize;
        let mut dead_lettered = 0usize;
        let mut new_cursor = cursor;
        // Once an event is left unresolved (still under its retry budget),
        // the cursor must stop advancing at the sequence just before it —
        // otherwise the next pass's `get_after_sequence(cursor)` would
        // never surface it again. Siblings after it still get folded (so
        // their effect isn't delayed), just not reflected in the cursor
        // until the blocker itself resolves.
        let mut blocked = false;
        let now = self.clock.now();

        {
            let mut aggregate = self.central.write().await;
            for event in &pending {
                match fold_one(&mut aggregate, event) {
                    Ok(()) => {
                        applied += 1;
                        if !blocked {
                            new_cursor = event.sequence;
                        }
                    }
                    Err(reason) => {
                        warn!(id = %event.id, sequence = event.sequence, reason = %reason, "sync handler failed");
                        self.event_log.record_failure(event.id, reason.clone(), now).await?;
                        let retry_count = self
                            .event_log
                            .get_by_id(event.id)
                            .await
                            .and_then(|e| e.retry_info)
                            .map(|r| r.retry_count)
                            .unwrap_or(0);
                        if retry_count >= self.config.max_retries {
                            let dlq_reason = format!("Max retries ({}) exceeded", self.config.max_retries);
                            if let Err(e) = move_to_dead_letter(&self.event_log, &self.dlq, event.id, dlq_reason, now).await {
                                error!(id = %event.id, error = %e, "failed to move event to dead-letter queue");
                            } else {
                                dead_lettered += 1;
                                // Resolved (quarantined): the cursor may pass it.
                                if !blocked {
                                    new_cursor = event.sequence;
                                }
                                continue;
                            }
                        }
                        // Still under its retry budget: keep folding the
                        // remaining siblings — one poisoned event must not
                        // halt the rest of the pass — but stop advancing
                        // the cursor past it so the next pass retries it.
                        blocked = true;
                    }
                }
            }

            if new_cursor != cursor {
                let file = CentralFile { cursor: new_cursor, aggregate: aggregate.clone() };
                self.fs.write_json_atomic(&self.central_path, &file).await?;
            }

            self.last_applied_sequence.store(new_cursor, Ordering::SeqCst);

            // Only snapshot a pass that fully resolved — a blocked event
            // means `aggregate` doesn't yet reflect everything through
            // `pending`'s last sequence, and a snapshot is addressed by
            // that last sequence.
            if applied > 0 && !blocked {
                if let Some(snapshot) = self
                    .snapshotter
                    .maybe_snapshot(&pending, &aggregate, self.config.snapshot_every_n_events)
                    .await?
                {
                    // The compactor must never delete events not yet
                    // reflected in a durable snapshot, so it only runs
                    // against the sequence the snapshot we just wrote
                    // actually covers.
                    if let Err(e) = self.snapshotter.compact_event_log(&self.event_log, snapshot.sequence).await {
                        warn!(sequence = snapshot.sequence, error = %e, "event log compaction failed");
                    }
                    if let Err(e) = self.snapshotter.cleanup_old_snapshots(self.config.snapshot_keep_count).await {
                        warn!(error = %e, "snapshot cleanup failed");
                    }
                }
            }
        }

        Ok(SyncOutcome { applied, dead_lettered, cursor: new_cursor })
    }

    /// Spawn the periodic sync loop. Stops when `shutdown` is cancelled;
    /// an in-flight `sync_once` is allowed to finish.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sync_once().await {
                            warn!(error = %e, "sync pass failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("sync worker stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Current folded aggregate, for the read API.
    pub async fn central_inventory(&self) -> CentralInventory {
        self.central.read().await.clone()
    }

    /// The highest sequence folded into the aggregate, for `/metrics`.
    pub fn cursor(&self) -> Sequence {
        self.last_applied_sequence.load(Ordering::SeqCst)
    }
}

/// Fold one event into the aggregate, failing if it would apply out of
/// order relative to what the aggregate already reflects for its key (the
/// handler failure the retry/DLQ policy exists to handle).
fn to_io_guard_error(err: ApiError) -> IoGuardError {
    IoGuardError::from(err)
}

fn fold_one(aggregate: &mut CentralInventory, event: &Event) -> Result<(), String> {
    if let Some(existing) = aggregate
        .get(&event.payload.store_id)
        .and_then(|skus| skus.get(&event.payload.sku))
    {
        // Equal version is a harmless re-fold of an event already applied —
        // `apply_event` overwrites rather than deltas, so this is an
        // idempotent no-op. It happens whenever an earlier pass processed
        // this event successfully but the cursor couldn't advance past an
        // unrelated sibling still under its retry budget. Only a version
        // strictly behind current is genuinely stale.
        if existing.version > event.payload.new_version {
            return Err(format!(
                "event sequence {} would apply stale version {} over current {}",
                event.sequence, event.payload.new_version, existing.version
            ));
        }
    }
    apply_event(aggregate, event);
    Ok(())
}
