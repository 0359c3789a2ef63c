#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-types** – Shared data model for StockLedger.
//!
//! This crate owns the wire/storage types every other crate exchanges:
//! inventory records, the event log's entry shape, the central aggregate
//! and its snapshots, idempotency bookkeeping, the lease-lock payload, and
//! the `ApiError` taxonomy the HTTP layer maps to status codes. It also
//! owns the `Clock`/`Jitter` injection traits so every TTL/backoff decision
//! in the workspace reads from the same seam.
//!
//! This crate has no I/O of its own; it sits at the bottom of the
//! dependency graph the way `toka-types` does for the Toka workspace.

pub mod clock;
pub mod error;
pub mod event;
pub mod idempotency;
pub mod jitter;
pub mod lock;
pub mod record;
pub mod snapshot;

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use crate::clock::{Clock, FrozenClock, SystemClock};
    pub use crate::error::ApiError;
    pub use crate::event::{DeadLetterEvent, Event, EventPayload, EventType, Operation, RetryInfo, Sequence};
    pub use crate::idempotency::{canonical_fingerprint, IdempotencyEntry, IdempotencyStatus};
    pub use crate::jitter::{DeterministicJitter, Jitter, RandJitter};
    pub use crate::lock::LockLease;
    pub use crate::record::{InventoryRecord, INITIAL_VERSION};
    pub use crate::snapshot::{CentralEntry, CentralInventory, Snapshot};
}
