//! Sequence-addressed snapshots of the central aggregate, plus event-log
//! compaction and replay.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sl_eventlog::EventLogStore;
use sl_ioguard::guarded::GuardedFs;
use sl_types::error::ApiError;
use sl_types::event::{Event, Sequence};
use sl_types::snapshot::{CentralEntry, CentralInventory, Snapshot};
use tracing::info;

/// Owns the `data/snapshots/` directory and produces/consumes
/// `central-<sequence>.json` files.
pub struct Snapshotter {
    snapshots_dir: PathBuf,
    fs: GuardedFs,
}

impl Snapshotter {
    /// Construct a snapshotter rooted at `snapshots_dir`.
    pub fn new(snapshots_dir: PathBuf, fs: GuardedFs) -> Self {
        Self { snapshots_dir, fs }
    }

    fn path_for(&self, sequence: Sequence) -> PathBuf {
        self.snapshots_dir.join(format!("central-{sequence}.json"))
    }

    /// If `events.len()` is nonzero and a multiple of `snapshot_every_n`,
    /// write a snapshot of `aggregate` addressed by the last event's
    /// sequence and return it. Otherwise returns `None` without touching
    /// disk.
    pub async fn maybe_snapshot(
        &self,
        events: &[Event],
        aggregate: &CentralInventory,
        snapshot_every_n: usize,
    ) -> Result<Option<Snapshot>, ApiError> {
        if events.is_empty() || events.len() % snapshot_every_n != 0 {
            return Ok(None);
        }
        let sequence = events.last().expect("checked non-empty above").sequence;
        let snapshot = Snapshot {
            sequence,
            timestamp: Utc::now(),
            central_inventory: aggregate.clone(),
            event_count: events.len(),
        };
        self.fs.ensure_dir(&self.snapshots_dir).await?;
        self.fs.write_json_atomic(&self.path_for(sequence), &snapshot).await?;
        info!(sequence, event_count = events.len(), "wrote snapshot");
        Ok(Some(snapshot))
    }

    /// Load the snapshot at `sequence`.
    pub async fn load_snapshot(&self, sequence: Sequence) -> Result<Snapshot, ApiError> {
        self.fs
            .read_json(&self.path_for(sequence))
            .await
            .map_err(ApiError::from)
    }

    /// Scan `snapshots_dir` for `central-<sequence>.json` files and return
    /// their sequence numbers, sorted ascending. The single source of
    /// truth both `get_latest_snapshot` and `cleanup_old_snapshots` build
    /// on.
    pub fn list_snapshot_sequences(&self) -> Vec<Sequence> {
        let Ok(entries) = std::fs::read_dir(&self.snapshots_dir) else {
            return Vec::new();
        };
        let mut sequences: Vec<Sequence> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| parse_snapshot_filename(&entry.path()))
            .collect();
        sequences.sort_unstable();
        sequences
    }

    /// The most recent snapshot, if any exist.
    pub async fn get_latest_snapshot(&self) -> Result<Option<Snapshot>, ApiError> {
        match self.list_snapshot_sequences().last() {
            Some(&sequence) => Ok(Some(self.load_snapshot(sequence).await?)),
            None => Ok(None),
        }
    }

    /// Remove every snapshot but the `keep_count` most recent.
    pub async fn cleanup_old_snapshots(&self, keep_count: usize) -> Result<(), ApiError> {
        let sequences = self.list_snapshot_sequences();
        if sequences.len() <= keep_count {
            return Ok(());
        }
        let to_remove = &sequences[..sequences.len() - keep_count];
        for &sequence in to_remove {
            self.fs.delete_file(&self.path_for(sequence)).await?;
        }
        Ok(())
    }

    /// Apply `events` with `sequence > snapshot.sequence`, in order, onto a
    /// copy of `snapshot.central_inventory`.
    pub fn replay_from_snapshot(&self, snapshot: &Snapshot, events: &[Event]) -> CentralInventory {
        let mut aggregate = snapshot.central_inventory.clone();
        for event in events.iter().filter(|e| e.sequence > snapshot.sequence) {
            apply_event(&mut aggregate, event);
        }
        aggregate
    }

    /// Read every event in `log`, drop those with `sequence <=
    /// snapshot_sequence`, and atomically rewrite the log file with the
    /// retained tail. If nothing remains, the log's `lastId`/`lastSequence`
    /// bookkeeping is preserved rather than cleared.
    pub async fn compact_event_log(&self, log: &EventLogStore, snapshot_sequence: Sequence) -> Result<(), ApiError> {
        let all = log.get_all().await;
        let retained: Vec<Event> = all.into_iter().filter(|e| e.sequence > snapshot_sequence).collect();
        log.replace_all(retained).await
    }
}

/// Fold a single event's effect into the central aggregate. Unknown event
/// types are logged and skipped.
pub fn apply_event(aggregate: &mut CentralInventory, event: &Event) {
    use sl_types::event::EventType;
    match event.event_type {
        EventType::StockAdjusted | EventType::StockReserved => {
            let entry = CentralEntry {
                qty: event.payload.new_qty,
                version: event.payload.new_version,
                updated_at: event.timestamp,
            };
            aggregate
                .entry(event.payload.store_id.clone())
                .or_default()
                .insert(event.payload.sku.clone(), entry);
        }
        EventType::Unknown => {
            tracing::warn!(id = %event.id, "skipping unknown event type during fold");
        }
    }
}

fn parse_snapshot_filename(path: &Path) -> Option<Sequence> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix("central-")?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::jitter::DeterministicJitter;
    use std::sync::Arc;
    use std::time::Duration;

    fn guarded_fs() -> GuardedFs {
        GuardedFs::new(
            "test-snapshot",
            16,
            16,
            1000,
            Duration::from_secs(30),
            None,
            sl_ioguard::retry::RetryConfig { base_delay_ms: 1, times: 0, jitter_ms: 0 },
            Arc::new(sl_types::clock::SystemClock),
            Arc::new(DeterministicJitter::zero()),
        )
    }

    fn adjusted_event(sequence: Sequence, sku: &str, new_qty: i64, new_version: u64) -> Event {
        use sl_types::event::{EventPayload, EventType, Operation};
        let mut event = Event::new_unsequenced(
            EventType::StockAdjusted,
            EventPayload {
                sku: sku.to_string(),
                store_id: "STORE1".to_string(),
                previous_qty: 0,
                new_qty,
                previous_version: 0,
                new_version,
                operation: Operation::Adjust { delta: new_qty },
            },
            Utc::now(),
        );
        event.sequence = sequence;
        event
    }

    #[tokio::test]
    async fn maybe_snapshot_only_fires_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshots"), guarded_fs());
        let events: Vec<Event> = (1..=3).map(|s| adjusted_event(s, "SKU1", s as i64, s)).collect();
        let aggregate = CentralInventory::new();

        assert!(snapshotter.maybe_snapshot(&events, &aggregate, 5).await.unwrap().is_none());

        let five_events: Vec<Event> = (1..=5).map(|s| adjusted_event(s, "SKU1", s as i64, s)).collect();
        let snapshot = snapshotter
            .maybe_snapshot(&five_events, &aggregate, 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.sequence, 5);
    }

    #[tokio::test]
    async fn list_snapshot_sequences_scans_directory() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshots"), guarded_fs());
        let aggregate = CentralInventory::new();
        for n in [5usize, 10, 15] {
            let events: Vec<Event> = (1..=n).map(|s| adjusted_event(s as u64, "SKU1", s as i64, s as u64)).collect();
            snapshotter.maybe_snapshot(&events, &aggregate, 5).await.unwrap();
        }
        assert_eq!(snapshotter.list_snapshot_sequences(), vec![5, 10, 15]);
    }

    #[tokio::test]
    async fn cleanup_keeps_only_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshots"), guarded_fs());
        let aggregate = CentralInventory::new();
        for n in [5usize, 10, 15] {
            let events: Vec<Event> = (1..=n).map(|s| adjusted_event(s as u64, "SKU1", s as i64, s as u64)).collect();
            snapshotter.maybe_snapshot(&events, &aggregate, 5).await.unwrap();
        }
        snapshotter.cleanup_old_snapshots(1).await.unwrap();
        assert_eq!(snapshotter.list_snapshot_sequences(), vec![15]);
    }

    #[tokio::test]
    async fn replay_from_snapshot_applies_only_tail() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshots"), guarded_fs());
        let mut base = CentralInventory::new();
        base.entry("STORE1".to_string()).or_default().insert(
            "SKU1".to_string(),
            CentralEntry { qty: 5, version: 3, updated_at: Utc::now() },
        );
        let snapshot = Snapshot {
            sequence: 3,
            timestamp: Utc::now(),
            central_inventory: base,
            event_count: 3,
        };
        let tail = vec![adjusted_event(4, "SKU1", 8, 4)];
        let replayed = snapshotter.replay_from_snapshot(&snapshot, &tail);
        let entry = &replayed["STORE1"]["SKU1"];
        assert_eq!(entry.qty, 8);
        assert_eq!(entry.version, 4);
    }
}
