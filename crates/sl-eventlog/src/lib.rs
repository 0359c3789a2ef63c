#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-eventlog** – The durable, append-only write-ahead log and its
//! sibling dead-letter queue.
//!
//! `append` is the system's linearization point: every mutation becomes
//! visible to the rest of the system in the order it was appended, and the
//! assigned `sequence` is the total order every downstream consumer (the
//! sync worker, the snapshotter) must honor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sl_ioguard::guarded::GuardedFs;
use sl_types::error::ApiError;
use sl_types::event::{DeadLetterEvent, Event, EventType, Sequence};
use tokio::sync::RwLock;
use tracing::debug;

/// On-disk shape of the event log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventLogFile {
    events: Vec<Event>,
    last_id: Option<uuid::Uuid>,
    last_sequence: Option<Sequence>,
}

/// Aggregate counters surfaced at `/metrics` and `/health`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogStats {
    /// Total events currently in the log.
    pub total_events: usize,
    /// Events carrying retry bookkeeping (i.e. failed at least once).
    pub events_with_retries: usize,
    /// Highest assigned sequence number, if any event exists.
    pub last_sequence: Option<Sequence>,
}

/// The durable append-only event log.
///
/// Holds the whole log in memory behind a `RwLock`, mirrored to
/// `data/event-log.json` through `GuardedFs`. Every mutating operation
/// takes the write lock, mutates the in-memory structure, then persists
/// atomically before releasing — giving `append` its linearization point
/// without a separate on-disk lock file.
pub struct EventLogStore {
    path: PathBuf,
    fs: GuardedFs,
    state: RwLock<EventLogFile>,
}

impl EventLogStore {
    /// Load (or initialize empty) the event log at `path` using `fs` for
    /// persistence.
    pub async fn load(path: PathBuf, fs: GuardedFs) -> Result<Arc<Self>, ApiError> {
        let state = match fs.read_json::<EventLogFile>(&path).await {
            Ok(file) => file,
            Err(_) => EventLogFile::default(),
        };
        Ok(Arc::new(Self {
            path,
            fs,
            state: RwLock::new(state),
        }))
    }

    async fn persist(&self, file: &EventLogFile) -> Result<(), ApiError> {
        self.fs.write_json_atomic(&self.path, file).await.map_err(ApiError::from)
    }

    /// Append `event`. If an event with the same `id` already exists, this
    /// is a no-op that returns the existing (already-sequenced) event —
    /// the idempotent-append contract callers rely on for safe retries.
    pub async fn append(&self, mut event: Event) -> Result<Event, ApiError> {
        let mut guard = self.state.write().await;
        if let Some(existing) = guard.events.iter().find(|e| e.id == event.id) {
            debug!(id = %event.id, "duplicate append id, returning existing event");
            return Ok(existing.clone());
        }
        let next_sequence = guard.last_sequence.unwrap_or(0) + 1;
        event.sequence = next_sequence;
        guard.events.push(event.clone());
        guard.last_id = Some(event.id);
        guard.last_sequence = Some(next_sequence);
        self.persist(&guard).await?;
        Ok(event)
    }

    /// All events, in append order.
    pub async fn get_all(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Events matching `event_type`.
    pub async fn get_by_type(&self, event_type: EventType) -> Vec<Event> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Events timestamped within `[from, to]` inclusive.
    pub async fn get_by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Event> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Events with `sequence > after`, in order.
    pub async fn get_after_sequence(&self, after: Sequence) -> Vec<Event> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect()
    }

    /// A single event by its idempotent-append id.
    pub async fn get_by_id(&self, id: uuid::Uuid) -> Option<Event> {
        self.state.read().await.events.iter().find(|e| e.id == id).cloned()
    }

    /// The most recently appended event, if any.
    pub async fn get_last(&self) -> Option<Event> {
        self.state.read().await.events.last().cloned()
    }

    /// A page of events, oldest-first.
    pub async fn get_paginated(&self, offset: usize, limit: usize) -> Vec<Event> {
        self.state
            .read()
            .await
            .events
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Total event count.
    pub async fn get_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Set retry bookkeeping for `id` directly to `retry_count`/`reason`,
    /// without regard to the previous value.
    pub async fn update_retry_info(
        &self,
        id: uuid::Uuid,
        retry_count: u32,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        let event = guard
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ApiError::NotFound {
                store_id: String::new(),
                sku: format!("event:{id}"),
            })?;
        event.set_retry_info(retry_count, reason, now);
        self.persist(&guard).await
    }

    /// Record a processing failure for `id`, incrementing its retry count.
    pub async fn record_failure(&self, id: uuid::Uuid, reason: String, now: DateTime<Utc>) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        let event = guard
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ApiError::NotFound {
                store_id: String::new(),
                sku: format!("event:{id}"),
            })?;
        event.record_failure(reason, now);
        self.persist(&guard).await
    }

    /// Remove `id` entirely (used by `clear`-adjacent maintenance).
    pub async fn remove_event(&self, id: uuid::Uuid) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        guard.events.retain(|e| e.id != id);
        self.persist(&guard).await
    }

    /// Remove every event. Intended for test fixtures and compaction, not
    /// normal operation.
    pub async fn clear(&self) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        *guard = EventLogFile::default();
        self.persist(&guard).await
    }

    /// Aggregate stats for `/metrics`.
    pub async fn stats(&self) -> EventLogStats {
        let guard = self.state.read().await;
        EventLogStats {
            total_events: guard.events.len(),
            events_with_retries: guard.events.iter().filter(|e| e.retry_info.is_some()).count(),
            last_sequence: guard.last_sequence,
        }
    }

    /// Directory-relative path this store persists to, for the snapshotter.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory log wholesale (used by compaction to drop
    /// events already folded into a snapshot) and persist it.
    pub async fn replace_all(&self, events: Vec<Event>) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        guard.last_sequence = events.last().map(|e| e.sequence).or(guard.last_sequence);
        guard.last_id = events.last().map(|e| e.id).or(guard.last_id);
        guard.events = events;
        self.persist(&guard).await
    }
}

/// On-disk shape of the dead-letter file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterFile {
    entries: Vec<DeadLetterEvent>,
}

/// The dead-letter queue: events that exhausted their retry budget during
/// sync processing.
pub struct DeadLetterStore {
    path: PathBuf,
    fs: GuardedFs,
    state: RwLock<DeadLetterFile>,
}

impl DeadLetterStore {
    /// Load (or initialize empty) the dead-letter queue at `path`.
    pub async fn load(path: PathBuf, fs: GuardedFs) -> Result<Arc<Self>, ApiError> {
        let state = match fs.read_json::<DeadLetterFile>(&path).await {
            Ok(file) => file,
            Err(_) => DeadLetterFile::default(),
        };
        Ok(Arc::new(Self {
            path,
            fs,
            state: RwLock::new(state),
        }))
    }

    async fn persist(&self, file: &DeadLetterFile) -> Result<(), ApiError> {
        self.fs.write_json_atomic(&self.path, file).await.map_err(ApiError::from)
    }

    /// Quarantine `event`'s current state with `final_reason`, recording
    /// the retry count it had accumulated.
    pub async fn quarantine(&self, event: Event, final_reason: String, now: DateTime<Utc>) -> Result<(), ApiError> {
        let total_retries = event.retry_info.as_ref().map(|r| r.retry_count).unwrap_or(0);
        let entry = DeadLetterEvent {
            original_event: event,
            dlq_ts: now,
            final_failure_reason: final_reason,
            total_retries,
        };
        let mut guard = self.state.write().await;
        guard.entries.push(entry);
        self.persist(&guard).await
    }

    /// All quarantined entries.
    pub async fn get_all(&self) -> Vec<DeadLetterEvent> {
        self.state.read().await.entries.clone()
    }

    /// Number of quarantined entries, for `/metrics`.
    pub async fn get_count(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

/// Move `event` (identified by `id`) from `log` to `dlq`, appending its
/// current state with `final_reason` then removing it from the live log.
/// Reads the event first so the DLQ entry reflects its accumulated retry
/// count.
pub async fn move_to_dead_letter(
    log: &EventLogStore,
    dlq: &DeadLetterStore,
    id: uuid::Uuid,
    final_reason: String,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let event = log.get_by_id(id).await.ok_or_else(|| ApiError::NotFound {
        store_id: String::new(),
        sku: format!("event:{id}"),
    })?;
    dlq.quarantine(event, final_reason, now).await?;
    log.remove_event(id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::event::{EventPayload, Operation};
    use sl_types::jitter::DeterministicJitter;
    use std::time::Duration;

    fn guarded_fs() -> GuardedFs {
        GuardedFs::new(
            "test-eventlog",
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

    fn sample_event() -> Event {
        Event::new_unsequenced(
            EventType::StockAdjusted,
            EventPayload {
                sku: "SKU1".to_string(),
                store_id: "STORE1".to_string(),
                previous_qty: 10,
                new_qty: 15,
                previous_version: 1,
                new_version: 2,
                operation: Operation::Adjust { delta: 5 },
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn append_assigns_sequential_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogStore::load(dir.path().join("event-log.json"), guarded_fs()).await.unwrap();

        let first = log.append(sample_event()).await.unwrap();
        let second = log.append(sample_event()).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn duplicate_id_append_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogStore::load(dir.path().join("event-log.json"), guarded_fs()).await.unwrap();

        let event = sample_event();
        let first = log.append(event.clone()).await.unwrap();
        let second = log.append(event).await.unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(log.get_count().await, 1);
    }

    #[tokio::test]
    async fn record_failure_increments_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogStore::load(dir.path().join("event-log.json"), guarded_fs()).await.unwrap();
        let event = log.append(sample_event()).await.unwrap();

        log.record_failure(event.id, "boom".to_string(), Utc::now()).await.unwrap();
        log.record_failure(event.id, "boom again".to_string(), Utc::now()).await.unwrap();

        let reloaded = log.get_by_id(event.id).await.unwrap();
        assert_eq!(reloaded.retry_info.unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn move_to_dead_letter_removes_from_log_and_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let fs_log = guarded_fs();
        let fs_dlq = guarded_fs();
        let log = EventLogStore::load(dir.path().join("event-log.json"), fs_log).await.unwrap();
        let dlq = DeadLetterStore::load(dir.path().join("dead-letter.json"), fs_dlq).await.unwrap();

        let event = log.append(sample_event()).await.unwrap();
        move_to_dead_letter(&log, &dlq, event.id, "exhausted".to_string(), Utc::now())
            .await
            .unwrap();

        assert_eq!(log.get_count().await, 0);
        assert_eq!(dlq.get_count().await, 1);
        let quarantined = dlq.get_all().await;
        assert_eq!(quarantined[0].final_failure_reason, "exhausted");
    }

    #[tokio::test]
    async fn get_after_sequence_filters_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogStore::load(dir.path().join("event-log.json"), guarded_fs()).await.unwrap();
        for _ in 0..5 {
            log.append(sample_event()).await.unwrap();
        }
        let after = log.get_after_sequence(3).await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].sequence, 4);
    }
}
