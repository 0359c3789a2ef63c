//! Exponential-backoff retry with injectable jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sl_types::jitter::Jitter;
use tracing::warn;

use crate::error::IoGuardError;

/// Backoff configuration for [`with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Base delay in milliseconds (`RETRY_BASE_MS`).
    pub base_delay_ms: u64,
    /// Number of retries after the first attempt (`RETRY_TIMES`); the
    /// operation runs at most `times + 1` times total.
    pub times: u32,
    /// Upper bound (exclusive) of the uniform jitter added to each sleep,
    /// in milliseconds (`RETRY_JITTER_MS`).
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            times: 3,
            jitter_ms: 0,
        }
    }
}

/// Run `op` up to `config.times + 1` times, sleeping
/// `base_delay * 2^(attempt-1) + U[0, jitter_ms)` between attempts.
///
/// On exhaustion, returns [`IoGuardError::RetryExhausted`] wrapping the
/// last failure's message.
pub async fn with_retry<T, E, F, Fut>(
    op_name: &str,
    config: RetryConfig,
    jitter: &Arc<dyn Jitter>,
    mut op: F,
) -> Result<T, IoGuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.times + 1;
    let mut last_cause = String::new();

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_cause = e.to_string();
                if attempt < max_attempts {
                    let backoff_ms = config.base_delay_ms.saturating_mul(1u64 << (attempt - 1));
                    let jitter_ms = jitter.next_u64_below(config.jitter_ms.max(1)).min(config.jitter_ms);
                    let sleep_ms = backoff_ms + jitter_ms;
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts,
                        sleep_ms,
                        cause = %last_cause,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                }
            }
        }
    }

    Err(IoGuardError::RetryExhausted {
        op: op_name.to_string(),
        attempts: max_attempts,
        last_cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::jitter::DeterministicJitter;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_sleeping() {
        let jitter: Arc<dyn Jitter> = Arc::new(DeterministicJitter::zero());
        let calls = AtomicU32::new(0);
        let result: Result<u32, IoGuardError> = with_retry("noop", RetryConfig::default(), &jitter, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<u32, String>(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let jitter: Arc<dyn Jitter> = Arc::new(DeterministicJitter::zero());
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay_ms: 1,
            times: 3,
            jitter_ms: 0,
        };
        let result: Result<u32, IoGuardError> = with_retry("flaky", config, &jitter, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_wraps_last_cause() {
        let jitter: Arc<dyn Jitter> = Arc::new(DeterministicJitter::zero());
        let config = RetryConfig {
            base_delay_ms: 1,
            times: 2,
            jitter_ms: 0,
        };
        let result: Result<u32, IoGuardError> = with_retry("always-fails", config, &jitter, || async {
            Err::<u32, _>("boom".to_string())
        })
        .await;
        match result {
            Err(IoGuardError::RetryExhausted { attempts, last_cause, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_cause, "boom");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }
}
