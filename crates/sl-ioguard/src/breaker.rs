//! Closed / open / half-open circuit breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sl_types::clock::Clock;
use tokio::sync::Mutex;

use crate::error::IoGuardError;

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: DateTime<Utc> },
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before transitioning `closed -> open`.
    pub failure_threshold: u32,
    /// How long to stay `open` before allowing a half-open probe.
    pub cooldown: Duration,
    /// Optional per-call timeout; a call that doesn't settle in time fails
    /// with [`IoGuardError::Timeout`] and counts as a breaker failure.
    pub timeout: Option<Duration>,
}

/// A named closed/open/half-open circuit breaker guarding one logical
/// operation (e.g. "filesystem", "sync-iteration").
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Construct a new breaker, starting `closed`.
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::Closed { consecutive_failures: 0 }),
            clock,
        })
    }

    /// Run `f` through the breaker's gate.
    ///
    /// `closed`: runs `f` and updates the consecutive-failure count.
    /// `open`: fails fast until `cooldown` has elapsed since the last
    /// failure, at which point exactly one caller transitions to
    /// `half-open` and becomes the probe; concurrent callers during that
    /// window also fail fast (they are not queued — the bulkhead layered
    /// outside the breaker already bounds concurrency).
    /// `half-open`: the probe's outcome closes or reopens the breaker.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, IoGuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<IoGuardError>,
    {
        let should_run = {
            let mut state = self.state.lock().await;
            match *state {
                BreakerState::Closed { .. } => true,
                BreakerState::HalfOpen => false,
                BreakerState::Open { since } => {
                    let elapsed = self.clock.now().signed_duration_since(since);
                    if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.cooldown {
                        *state = BreakerState::HalfOpen;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !should_run {
            return Err(IoGuardError::BreakerOpen {
                name: self.name.clone(),
            });
        }

        let outcome = match self.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(IoGuardError::Timeout {
                    op: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            None => f().await.map_err(Into::into),
        };

        self.record_outcome(outcome.is_ok()).await;
        outcome
    }

    async fn record_outcome(&self, success: bool) {
        let mut state = self.state.lock().await;
        *state = match (*state, success) {
            (BreakerState::HalfOpen, true) => BreakerState::Closed { consecutive_failures: 0 },
            (BreakerState::HalfOpen, false) => BreakerState::Open { since: self.clock.now() },
            (BreakerState::Closed { .. }, true) => BreakerState::Closed { consecutive_failures: 0 },
            (BreakerState::Closed { consecutive_failures }, false) => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    BreakerState::Open { since: self.clock.now() }
                } else {
                    BreakerState::Closed { consecutive_failures: failures }
                }
            }
            (open @ BreakerState::Open { .. }, _) => open,
        };
    }

    /// Whether the breaker is currently open (for `/metrics`).
    pub async fn is_open(&self) -> bool {
        matches!(*self.state.lock().await, BreakerState::Open { .. })
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::clock::FrozenClock;

    fn breaker(threshold: u32, cooldown_ms: u64) -> (Arc<CircuitBreaker>, Arc<FrozenClock>) {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
                timeout: None,
            },
            clock.clone(),
        );
        (breaker, clock)
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker(2, 1000);
        for _ in 0..2 {
            let _: Result<(), _> = breaker.call(|| async { Err::<(), _>(IoGuardError::Io(std::io::Error::other("x"))) }).await;
        }
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_until_cooldown_then_allows_one_probe() {
        let (breaker, clock) = breaker(1, 1000);
        let _: Result<(), _> = breaker.call(|| async { Err::<(), _>(IoGuardError::Io(std::io::Error::other("x"))) }).await;
        assert!(breaker.is_open().await);

        let rejected = breaker.call(|| async { Ok::<(), IoGuardError>(()) }).await;
        assert!(matches!(rejected, Err(IoGuardError::BreakerOpen { .. })));

        clock.advance_millis(1500);
        let probe = breaker.call(|| async { Ok::<(), IoGuardError>(()) }).await;
        assert!(probe.is_ok());
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn failed_probe_reopens_breaker() {
        let (breaker, clock) = breaker(1, 1000);
        let _: Result<(), _> = breaker.call(|| async { Err::<(), _>(IoGuardError::Io(std::io::Error::other("x"))) }).await;
        clock.advance_millis(1500);
        let _: Result<(), _> = breaker.call(|| async { Err::<(), _>(IoGuardError::Io(std::io::Error::other("still failing"))) }).await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn timeout_counts_as_a_failure() {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(1000),
                timeout: Some(Duration::from_millis(10)),
            },
            clock,
        );
        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), IoGuardError>(())
            })
            .await;
        assert!(matches!(result, Err(IoGuardError::Timeout { .. })));
        assert!(breaker.is_open().await);
    }
}
