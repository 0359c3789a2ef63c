//! The error taxonomy the HTTP layer maps to status codes.
//!
//! Lower crates keep their own local error enums (`IoGuardError`,
//! `EventLogError`, ...) and convert into [`ApiError`] at the crate
//! boundary, the same layering `toka-store-core::StorageError` uses
//! relative to its callers.

use serde::Serialize;

/// Error kinds the write path and its collaborators can raise.
///
/// Variant names double as the `error.name` field in the HTTP error body,
/// so renaming one is a wire-format change.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "name")]
pub enum ApiError {
    /// Malformed or out-of-range input.
    #[error("validation failed: {message}")]
    Validation {
        /// Human-readable description of what was invalid.
        message: String,
    },

    /// The requested `(storeId, sku)` record does not exist.
    #[error("record not found: store={store_id} sku={sku}")]
    NotFound {
        /// Store identifier looked up.
        store_id: String,
        /// SKU looked up.
        sku: String,
    },

    /// `expectedVersion` did not match the current record version.
    #[error("version conflict: store={store_id} sku={sku} expected={expected} current={current}")]
    Conflict {
        /// SKU in conflict.
        sku: String,
        /// Store in conflict.
        store_id: String,
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        current: u64,
    },

    /// The requested decrement would take `qty` below zero.
    #[error("insufficient stock: store={store_id} sku={sku} requested={requested} available={available}")]
    InsufficientStock {
        /// SKU short of stock.
        sku: String,
        /// Store short of stock.
        store_id: String,
        /// Quantity requested to remove.
        requested: i64,
        /// Quantity actually available.
        available: i64,
    },

    /// Same idempotency key reused with a different payload fingerprint.
    #[error("idempotency key {key} reused with a different payload")]
    IdempotencyConflict {
        /// The key that was reused.
        key: String,
    },

    /// The file lease for this key is held by another process (or process
    /// instance), or contended during acquisition.
    #[error("lock rejected for key {key}, retry after {retry_after_ms}ms")]
    LockRejection {
        /// The key whose lease was rejected.
        key: String,
        /// Milliseconds the caller should wait before retrying.
        retry_after_ms: u64,
    },

    /// Lease ownership mismatch discovered at renew or release time.
    #[error("lock lost for key {key}: {reason}")]
    LockLost {
        /// The key whose lease was lost.
        key: String,
        /// Why the lease was considered lost.
        reason: String,
    },

    /// A bulkhead's in-flight-plus-queue capacity was exceeded.
    #[error("bulkhead {name} saturated")]
    Saturated {
        /// Name of the saturated bulkhead.
        name: String,
    },

    /// The load shedder rejected the request outright (queue depth over
    /// `LOAD_SHED_QUEUE_MAX`).
    #[error("load shed: queue depth exceeds threshold")]
    LoadShed,

    /// The token-bucket rate limiter rejected the request.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds the caller should wait before retrying.
        retry_after_ms: u64,
    },

    /// The circuit breaker guarding this operation is open.
    #[error("breaker {name} is open")]
    BreakerOpen {
        /// Name of the open breaker.
        name: String,
    },

    /// An operation did not settle within its configured timeout.
    #[error("operation {op} timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the operation that timed out.
        op: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A transient I/O failure survived the retry budget.
    #[error("I/O operation {op} failed after {attempts} attempts: {source_message}")]
    IoExhausted {
        /// Name of the I/O operation.
        op: String,
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last underlying failure.
        source_message: String,
    },

    /// An unexpected internal failure with no more specific kind.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable description.
        message: String,
    },
}

impl ApiError {
    /// Stable machine-readable code, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            ApiError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            ApiError::LockRejection { .. } => "LOCK_REJECTION",
            ApiError::LockLost { .. } => "LOCK_LOST",
            ApiError::Saturated { .. } => "SATURATED",
            ApiError::LoadShed => "LOAD_SHED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::BreakerOpen { .. } => "BREAKER_OPEN",
            ApiError::Timeout { .. } => "TIMEOUT",
            ApiError::IoExhausted { .. } => "IO_EXHAUSTED",
            ApiError::Internal { .. } => "INTERNAL",
        }
    }

    /// HTTP status code this error kind maps to, per spec §7.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation { .. } => 400,
            ApiError::NotFound { .. } => 404,
            ApiError::Conflict { .. } | ApiError::IdempotencyConflict { .. } => 409,
            ApiError::InsufficientStock { .. } => 422,
            ApiError::RateLimited { .. } => 429,
            ApiError::LockRejection { .. }
            | ApiError::Saturated { .. }
            | ApiError::LoadShed
            | ApiError::BreakerOpen { .. }
            | ApiError::Timeout { .. } => 503,
            ApiError::LockLost { .. } | ApiError::IoExhausted { .. } | ApiError::Internal { .. } => 500,
        }
    }

    /// `Retry-After` header value in milliseconds, if this error kind
    /// carries backpressure guidance.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ApiError::LockRejection { retry_after_ms, .. } => Some(*retry_after_ms),
            ApiError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            ApiError::LoadShed => Some(500),
            _ => None,
        }
    }

    /// The SKU a lease was rejected for, if this is a `LockRejection`
    /// (surfaced as the `X-Lock-Key` response header).
    pub fn lock_key(&self) -> Option<&str> {
        match self {
            ApiError::LockRejection { key, .. } => Some(key),
            _ => None,
        }
    }
}
