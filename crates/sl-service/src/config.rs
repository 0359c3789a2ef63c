//! Service configuration: defaults, env overrides, and validation.
//!
//! Mirrors the nested-struct / `Default` / `from_env` / `validate` shape
//! `toka-collaborative-auth::AuthConfig` uses: start from `Self::default()`,
//! override field-by-field from `std::env::var`, then validate the whole
//! thing before handing it to `main`.

use std::path::PathBuf;
use std::time::Duration;

/// Every tunable the service reads from the environment, with the defaults
/// spec §6's configuration table specifies.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Root directory for `event-log.json`, `inventory.json`,
    /// `dead-letter.json`, `central-inventory.json`, `locks/`, `snapshots/`.
    /// Overridden by `STOCKLEDGER_DATA_DIR`, primarily for test harnesses.
    pub data_dir: PathBuf,
    /// Concurrency limit for the bulkhead admitting HTTP mutation requests.
    pub concurrency_api: usize,
    /// Concurrency limit for the sync worker's bulkhead.
    pub concurrency_sync: usize,
    /// Token-bucket refill rate, in requests per second.
    pub rate_limit_rps: u32,
    /// Token-bucket capacity (maximum burst).
    pub rate_limit_burst: u32,
    /// Circuit breaker trip threshold, as a fraction of a 10-probe rolling
    /// window (`BREAKER_THRESHOLD` is specified as a `[0,1]` fraction;
    /// `breaker_failure_threshold()` converts it to the consecutive-failure
    /// count `sl_ioguard::CircuitBreaker` actually counts against).
    pub breaker_threshold: f64,
    /// How long a breaker stays open before allowing a half-open probe.
    pub breaker_cooldown: Duration,
    /// Base delay for `with_retry`'s exponential backoff.
    pub retry_base_ms: u64,
    /// Number of retry attempts `with_retry` makes.
    pub retry_times: u32,
    /// Maximum jitter added to each retry backoff.
    pub retry_jitter_ms: u64,
    /// Fold cadence (in applied events) at which the sync worker snapshots.
    pub snapshot_every_n_events: usize,
    /// Snapshots retained after compaction.
    pub snapshot_keep_count: usize,
    /// Queue-depth ceiling past which the load shedder rejects outright.
    pub load_shed_queue_max: usize,
    /// How long a completed idempotency entry is cached.
    pub idemp_ttl_ms: u64,
    /// Whether the cross-process lease lock is consulted at all.
    pub locks_enabled: bool,
    /// Lease duration in milliseconds when acquired.
    pub lock_ttl_ms: u64,
    /// Lease renewal cadence (reserved for a future keep-alive background
    /// task; the write path's leases are short-lived enough not to need one
    /// today).
    pub lock_renew_ms: u64,
    /// Directory the lease lock's `.lock` files live under, relative to
    /// `data_dir`.
    pub lock_dir: PathBuf,
    /// Status code surfaced to callers rejected by lock contention.
    pub lock_reject_status: u16,
    /// `Retry-After` value surfaced alongside `lock_reject_status`.
    pub lock_retry_after_ms: u64,
    /// This process's lease owner identifier (`<pid>-<uuid>`).
    pub lock_owner_id: String,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
    /// How many consecutive fold failures a given event may accumulate in
    /// the sync worker before being quarantined to the dead-letter queue.
    /// Not part of spec §6's table; chosen as a small, observable number
    /// (a handful of sync ticks' worth of retries, comfortably above
    /// transient contention, well below "never gives up").
    pub sync_max_retries: u32,
    /// Sync worker tick interval. Not part of spec §6's table; matched to
    /// `toka-orchestration-service`'s health-check cadence order of
    /// magnitude. `POST /sync/start` can override this at runtime.
    pub sync_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("data"),
            concurrency_api: 16,
            concurrency_sync: 4,
            rate_limit_rps: 100,
            rate_limit_burst: 200,
            breaker_threshold: 0.5,
            breaker_cooldown: Duration::from_millis(30_000),
            retry_base_ms: 1000,
            retry_times: 3,
            retry_jitter_ms: 0,
            snapshot_every_n_events: 100,
            snapshot_keep_count: 5,
            load_shed_queue_max: 1000,
            idemp_ttl_ms: 300_000,
            locks_enabled: false,
            lock_ttl_ms: 2000,
            lock_renew_ms: 1000,
            lock_dir: PathBuf::from("locks"),
            lock_reject_status: 503,
            lock_retry_after_ms: 300,
            lock_owner_id: default_lock_owner_id(),
            log_level: "info".to_string(),
            sync_max_retries: 5,
            sync_interval_ms: 5000,
        }
    }
}

fn default_lock_owner_id() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

impl ServiceConfig {
    /// Build from `Self::default()`, overriding each field present in the
    /// environment, then validate the result.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("PORT") {
            config.port = v.parse().map_err(|_| "Invalid PORT".to_string())?;
        }
        if let Ok(v) = std::env::var("STOCKLEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CONCURRENCY_API") {
            config.concurrency_api = v.parse().map_err(|_| "Invalid CONCURRENCY_API".to_string())?;
        }
        if let Ok(v) = std::env::var("CONCURRENCY_SYNC") {
            config.concurrency_sync = v.parse().map_err(|_| "Invalid CONCURRENCY_SYNC".to_string())?;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_RPS") {
            config.rate_limit_rps = v.parse().map_err(|_| "Invalid RATE_LIMIT_RPS".to_string())?;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_BURST") {
            config.rate_limit_burst = v.parse().map_err(|_| "Invalid RATE_LIMIT_BURST".to_string())?;
        }
        if let Ok(v) = std::env::var("BREAKER_THRESHOLD") {
            config.breaker_threshold = v.parse().map_err(|_| "Invalid BREAKER_THRESHOLD".to_string())?;
        }
        if let Ok(v) = std::env::var("BREAKER_COOLDOWN_MS") {
            let ms: u64 = v.parse().map_err(|_| "Invalid BREAKER_COOLDOWN_MS".to_string())?;
            config.breaker_cooldown = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("RETRY_BASE_MS") {
            config.retry_base_ms = v.parse().map_err(|_| "Invalid RETRY_BASE_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("RETRY_TIMES") {
            config.retry_times = v.parse().map_err(|_| "Invalid RETRY_TIMES".to_string())?;
        }
        if let Ok(v) = std::env::var("RETRY_JITTER_MS") {
            config.retry_jitter_ms = v.parse().map_err(|_| "Invalid RETRY_JITTER_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_EVERY_N_EVENTS") {
            config.snapshot_every_n_events = v.parse().map_err(|_| "Invalid SNAPSHOT_EVERY_N_EVENTS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOAD_SHED_QUEUE_MAX") {
            config.load_shed_queue_max = v.parse().map_err(|_| "Invalid LOAD_SHED_QUEUE_MAX".to_string())?;
        }
        if let Ok(v) = std::env::var("IDEMP_TTL_MS") {
            config.idemp_ttl_ms = v.parse().map_err(|_| "Invalid IDEMP_TTL_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCKS_ENABLED") {
            config.locks_enabled = v.parse().map_err(|_| "Invalid LOCKS_ENABLED".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCK_TTL_MS") {
            config.lock_ttl_ms = v.parse().map_err(|_| "Invalid LOCK_TTL_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCK_RENEW_MS") {
            config.lock_renew_ms = v.parse().map_err(|_| "Invalid LOCK_RENEW_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCK_DIR") {
            config.lock_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOCK_REJECT_STATUS") {
            config.lock_reject_status = v.parse().map_err(|_| "Invalid LOCK_REJECT_STATUS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCK_RETRY_AFTER_MS") {
            config.lock_retry_after_ms = v.parse().map_err(|_| "Invalid LOCK_RETRY_AFTER_MS".to_string())?;
        }
        if let Ok(v) = std::env::var("LOCK_OWNER_ID") {
            config.lock_owner_id = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Hard-fail on values that would make the service behave incoherently.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_api == 0 {
            return Err("CONCURRENCY_API must be at least 1".to_string());
        }
        if self.concurrency_sync == 0 {
            return Err("CONCURRENCY_SYNC must be at least 1".to_string());
        }
        if self.rate_limit_rps == 0 {
            return Err("RATE_LIMIT_RPS must be at least 1".to_string());
        }
        if self.rate_limit_burst == 0 {
            return Err("RATE_LIMIT_BURST must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.breaker_threshold) {
            return Err("BREAKER_THRESHOLD must be in [0, 1]".to_string());
        }
        if self.retry_times > 20 {
            return Err("RETRY_TIMES is unreasonably large (> 20)".to_string());
        }
        if self.snapshot_every_n_events == 0 {
            return Err("SNAPSHOT_EVERY_N_EVENTS must be at least 1".to_string());
        }
        if self.load_shed_queue_max == 0 {
            return Err("LOAD_SHED_QUEUE_MAX must be at least 1".to_string());
        }
        Ok(())
    }

    /// Consecutive-failure count `sl_ioguard::CircuitBreaker` should trip
    /// at, derived from `breaker_threshold`'s `[0,1]` fraction over a
    /// 10-probe rolling window. Clamped to at least 1 so a threshold of
    /// `0.0` still opens on the very first failure rather than never.
    pub fn breaker_failure_threshold(&self) -> u32 {
        ((self.breaker_threshold * 10.0).round() as u32).max(1)
    }

    /// Path to the event log file.
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("event-log.json")
    }

    /// Path to the inventory cache file.
    pub fn inventory_path(&self) -> PathBuf {
        self.data_dir.join("inventory.json")
    }

    /// Path to the dead-letter queue file.
    pub fn dead_letter_path(&self) -> PathBuf {
        self.data_dir.join("dead-letter.json")
    }

    /// Path to the central aggregate file the sync worker maintains.
    pub fn central_inventory_path(&self) -> PathBuf {
        self.data_dir.join("central-inventory.json")
    }

    /// Path to the snapshots directory.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Path to the lease-lock directory.
    pub fn lock_dir_path(&self) -> PathBuf {
        self.data_dir.join(&self.lock_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = ServiceConfig::default();
        assert_eq!(config.concurrency_api, 16);
        assert_eq!(config.concurrency_sync, 4);
        assert_eq!(config.rate_limit_rps, 100);
        assert_eq!(config.rate_limit_burst, 200);
        assert_eq!(config.breaker_cooldown, Duration::from_millis(30_000));
        assert_eq!(config.retry_base_ms, 1000);
        assert_eq!(config.retry_times, 3);
        assert_eq!(config.snapshot_every_n_events, 100);
        assert_eq!(config.load_shed_queue_max, 1000);
        assert_eq!(config.idemp_ttl_ms, 300_000);
        assert!(!config.locks_enabled);
        assert_eq!(config.lock_ttl_ms, 2000);
        assert_eq!(config.lock_retry_after_ms, 300);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn breaker_threshold_out_of_range_fails_validation() {
        let mut config = ServiceConfig::default();
        config.breaker_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn breaker_failure_threshold_converts_fraction_to_count() {
        let mut config = ServiceConfig::default();
        config.breaker_threshold = 0.5;
        assert_eq!(config.breaker_failure_threshold(), 5);
        config.breaker_threshold = 0.0;
        assert_eq!(config.breaker_failure_threshold(), 1);
        config.breaker_threshold = 1.0;
        assert_eq!(config.breaker_failure_threshold(), 10);
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let mut config = ServiceConfig::default();
        config.concurrency_api = 0;
        assert!(config.validate().is_err());
    }
}
