//! Inventory record: the per-`(storeId, sku)` read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The version assigned to a `(storeId, sku)` pair that has never been
/// mutated. The first successful mutation increments this to `2`.
pub const INITIAL_VERSION: u64 = 1;

/// A single store's stock level for a single SKU.
///
/// Invariants (enforced by `sl-mutation`, not by this type alone):
/// `qty >= 0` at every observable moment, and `version` strictly increases
/// by exactly one per successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    /// Store identifier half of the composite key.
    pub store_id: String,
    /// SKU identifier half of the composite key.
    pub sku: String,
    /// Current non-negative quantity on hand.
    pub qty: i64,
    /// Strictly positive, strictly increasing optimistic-concurrency version.
    pub version: u64,
    /// Timestamp of the last successful upsert.
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Synthesize the record a `(storeId, sku)` pair implicitly has before
    /// its first mutation: zero quantity, initial version, "now" timestamp.
    pub fn synthesize(store_id: &str, sku: &str, now: DateTime<Utc>) -> Self {
        Self {
            store_id: store_id.to_string(),
            sku: sku.to_string(),
            qty: 0,
            version: INITIAL_VERSION,
            updated_at: now,
        }
    }
}
