//! Event log entries: the durable write-ahead record of every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic position of an event within the log. Assigned at append time
/// by the event log store; never reused, even across compaction.
pub type Sequence = u64;

/// Tagged event-type discriminant. New kinds extend this enum without
/// touching the on-disk format — unknown values deserialize into
/// `EventType::Unknown` (see `serde(other)`), which downstream consumers
/// log and skip rather than reject outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A signed-delta adjustment to stock.
    StockAdjusted,
    /// A reservation that decremented stock by a positive quantity.
    StockReserved,
    /// Any event type this build doesn't recognize. Never produced by this
    /// build; exists so an older reader tolerates a future event kind.
    #[serde(other)]
    Unknown,
}

/// The operation-specific half of an event's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// `adjustStock`: quantity changed by a signed delta.
    Adjust {
        /// Signed quantity change applied.
        delta: i64,
    },
    /// `reserveStock`: quantity decreased by a positive reserved amount.
    Reserve {
        /// Positive quantity reserved (and removed from available stock).
        reserved_qty: i64,
    },
}

/// Fields common to every mutation event, plus the operation-specific delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// SKU the event mutated.
    pub sku: String,
    /// Store the event mutated.
    pub store_id: String,
    /// Quantity immediately before the mutation.
    pub previous_qty: i64,
    /// Quantity immediately after the mutation.
    pub new_qty: i64,
    /// Version immediately before the mutation.
    pub previous_version: u64,
    /// Version immediately after the mutation (`previous_version + 1`).
    pub new_version: u64,
    /// Operation-specific data (the signed delta, or the reserved amount).
    #[serde(flatten)]
    pub operation: Operation,
}

/// Retry bookkeeping attached to an event once sync processing has failed
/// on it at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    /// Number of recorded processing failures for this event.
    pub retry_count: u32,
    /// Timestamp of the most recent recorded failure.
    pub last_failure_ts: Option<DateTime<Utc>>,
    /// Human-readable reason for the most recent recorded failure.
    pub failure_reason: Option<String>,
}

impl RetryInfo {
    fn fresh(retry_count: u32, reason: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            retry_count,
            last_failure_ts: Some(now),
            failure_reason: reason,
        }
    }
}

/// A single durable, append-only log entry.
///
/// `id` is caller-supplied (minted fresh by the mutation service for each
/// successful write) and is the idempotent-append key: a duplicate `id` on
/// append is a no-op. `sequence` is assigned by the event log store itself
/// and forms the global total order every consumer must honor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Caller-supplied UUID; the idempotent-append key.
    pub id: Uuid,
    /// Monotonic position assigned at append.
    pub sequence: Sequence,
    /// Wall-clock time the event was appended.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event body.
    pub payload: EventPayload,
    /// Present once sync processing has failed on this event at least once.
    pub retry_info: Option<RetryInfo>,
}

impl Event {
    /// Build a fresh event with no sequence assigned yet and no retry
    /// bookkeeping. The event log store assigns `sequence` at append time.
    pub fn new_unsequenced(event_type: EventType, payload: EventPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: now,
            event_type,
            payload,
            retry_info: None,
        }
    }

    /// Record a processing failure, incrementing the retry count.
    ///
    /// Per the resolved open question in `sl-types`'s spec, this increments
    /// `retry_count` rather than resetting it to zero — the sync worker's
    /// `retry_count >= max_retries` DLQ policy depends on it.
    pub fn record_failure(&mut self, reason: String, now: DateTime<Utc>) {
        let next_count = self
            .retry_info
            .as_ref()
            .map(|r| r.retry_count + 1)
            .unwrap_or(1);
        self.retry_info = Some(RetryInfo::fresh(next_count, Some(reason), now));
    }

    /// Overwrite retry bookkeeping directly (used by `updateRetryInfo`).
    pub fn set_retry_info(&mut self, retry_count: u32, reason: Option<String>, now: DateTime<Utc>) {
        self.retry_info = Some(RetryInfo::fresh(retry_count, reason, now));
    }
}

/// A quarantined event that exhausted its retry budget during sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEvent {
    /// The event as it stood at the moment it was quarantined.
    pub original_event: Event,
    /// When the event was moved to the dead-letter queue.
    pub dlq_ts: DateTime<Utc>,
    /// The failure reason that triggered quarantine.
    pub final_failure_reason: String,
    /// Total retries recorded before quarantine.
    pub total_retries: u32,
}
