#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-ioguard** – Safe I/O primitives and the resilience fabric for
//! StockLedger: atomic write-rename, retry with backoff+jitter, a bounded
//! concurrency bulkhead, and a closed/open/half-open circuit breaker.
//!
//! Every durable write in the workspace goes through [`guarded::GuardedFs`],
//! which composes a bulkhead, a breaker, and retry in the order spec §4.1
//! requires: bulkhead admits, breaker gates, retry rides out transient
//! failures within the admitted, gated call.

pub mod breaker;
pub mod bulkhead;
pub mod error;
pub mod fsops;
pub mod guarded;
pub mod retry;

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, CircuitBreaker};
    pub use crate::bulkhead::{Bulkhead, BulkheadStats};
    pub use crate::error::IoGuardError;
    pub use crate::guarded::GuardedFs;
    pub use crate::retry::{with_retry, RetryConfig};
}
