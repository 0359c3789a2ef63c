//! Local error kinds for the resilience fabric.

use sl_types::error::ApiError;

/// Errors raised by the safe I/O primitives, the bulkhead, the circuit
/// breaker, and `with_retry`.
#[derive(Debug, thiserror::Error)]
pub enum IoGuardError {
    /// The underlying filesystem operation failed.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A bulkhead's in-flight-plus-queue capacity was exceeded.
    #[error("bulkhead {name} saturated")]
    Saturated {
        /// Name of the saturated bulkhead.
        name: String,
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
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// `with_retry` exhausted its attempt budget.
    #[error("{op} failed after {attempts} attempts: {last_cause}")]
    RetryExhausted {
        /// Name of the retried operation.
        op: String,
        /// Number of attempts made.
        attempts: u32,
        /// Display of the last underlying failure.
        last_cause: String,
    },

    /// A closure admitted through the bulkhead/breaker failed with an
    /// `ApiError` that already carries its own precise kind (a version
    /// conflict, insufficient stock, ...). Carried unchanged so the
    /// `From<IoGuardError> for ApiError` conversion below can hand it back
    /// losslessly instead of flattening it into a generic I/O failure.
    #[error("{0}")]
    Wrapped(#[from] Box<ApiError>),
}

impl From<ApiError> for IoGuardError {
    /// Lets an `ApiError`-returning closure be admitted through
    /// [`crate::bulkhead::Bulkhead::run`] or
    /// [`crate::breaker::CircuitBreaker::call`], both of which bound their
    /// closure's error on `Into<IoGuardError>`. The `From<IoGuardError> for
    /// ApiError` impl below unwraps `Wrapped` back to the exact original
    /// variant, so callers that wrap their domain errors this way see no
    /// loss of information across the round trip.
    fn from(err: ApiError) -> Self {
        IoGuardError::Wrapped(Box::new(err))
    }
}

impl From<IoGuardError> for ApiError {
    fn from(err: IoGuardError) -> Self {
        match err {
            IoGuardError::Wrapped(inner) => *inner,
            IoGuardError::Saturated { name } => ApiError::Saturated { name },
            IoGuardError::BreakerOpen { name } => ApiError::BreakerOpen { name },
            IoGuardError::Timeout { op, timeout_ms } => ApiError::Timeout { op, timeout_ms },
            IoGuardError::RetryExhausted { op, attempts, last_cause } => ApiError::IoExhausted {
                op,
                attempts,
                source_message: last_cause,
            },
            IoGuardError::Io(e) => ApiError::IoExhausted {
                op: "filesystem".to_string(),
                attempts: 1,
                source_message: e.to_string(),
            },
            IoGuardError::Json(e) => ApiError::Internal {
                message: format!("JSON error: {e}"),
            },
        }
    }
}
