//! The central aggregate and its point-in-time snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Sequence;

/// A single store/SKU entry in the central aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralEntry {
    /// Quantity as of the last applied event.
    pub qty: i64,
    /// Version as of the last applied event.
    pub version: u64,
    /// Timestamp of the event that produced this entry (not wall-clock
    /// apply time — derived from the source event's own `timestamp`).
    pub updated_at: DateTime<Utc>,
}

/// `storeId -> sku -> entry`. Reproducible from the event log; this is a
/// read-side cache, never a source of truth.
pub type CentralInventory = HashMap<String, HashMap<String, CentralEntry>>;

/// A point-in-time materialization of the central aggregate, addressed by
/// the sequence of the last event folded into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Sequence of the last event folded into this snapshot.
    pub sequence: Sequence,
    /// Wall-clock time the snapshot was written.
    pub timestamp: DateTime<Utc>,
    /// Deep copy of the central aggregate at `sequence`.
    pub central_inventory: CentralInventory,
    /// Number of events folded to produce this snapshot (informational).
    pub event_count: usize,
}
