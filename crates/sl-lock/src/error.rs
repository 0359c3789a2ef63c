//! Local error kinds for the lease lock.

use sl_types::error::ApiError;

/// Errors raised by [`crate::LeaseLockManager`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lease is held by another process (or contended during a retry
    /// after this process stole an expired lease).
    #[error("lock for key {key} held by another process")]
    Held {
        /// The contended key.
        key: String,
    },

    /// Two racing acquisitions both observed the lease file missing and
    /// both attempted exclusive-create; one of them lost the race.
    #[error("race during retry acquiring lock for key {key}")]
    RaceDuringRetry {
        /// The contended key.
        key: String,
    },

    /// The lease file's owner did not match the caller's handle at renew
    /// or release time.
    #[error("lock lost for key {key}: {reason}")]
    Lost {
        /// The key whose lease was lost.
        key: String,
        /// Why the lease was considered lost (owner mismatch, etc).
        reason: String,
    },

    /// The underlying filesystem operation failed.
    #[error("lock filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { key } | LockError::RaceDuringRetry { key } => ApiError::LockRejection {
                key,
                retry_after_ms: 0,
            },
            LockError::Lost { key, reason } => ApiError::LockLost { key, reason },
            LockError::Io(e) => ApiError::Internal {
                message: format!("lock I/O error: {e}"),
            },
        }
    }
}
