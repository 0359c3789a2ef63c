//! Lease-lock wire type shared between `sl-lock` and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The payload persisted in a per-key lease file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockLease {
    /// The key this lease protects (e.g. a SKU).
    pub key: String,
    /// Process-unique identifier of the lease holder.
    pub owner: String,
    /// Absolute expiry; an expired lease may be stolen.
    pub expires_at: DateTime<Utc>,
}
