#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-lock** – Optional, flag-gated cross-process lease lock.
//!
//! A lease is an exclusive-create of a per-key file holding
//! `{owner, expiresAt}`. Unlike the in-process [`sl-serializer`] crate,
//! this guards against *other processes* (or other instances of this
//! process, e.g. during a rolling deploy) racing on the same SKU.
//!
//! Per spec §5, lock operations must never be I/O-blocked by the general
//! filesystem pool — callers construct this manager with its own
//! `sl_ioguard::GuardedFs` pool, distinct from the one shared by the event
//! log, inventory store, and snapshotter.

pub mod error;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use sl_ioguard::guarded::GuardedFs;
use sl_types::clock::Clock;
use sl_types::lock::LockLease;
use tracing::{debug, info, warn};

pub use error::LockError;

/// An outstanding lease, as returned by [`LeaseLockManager::acquire`] and
/// required by [`LeaseLockManager::renew`]/[`LeaseLockManager::release`].
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// The key this handle leases.
    pub key: String,
    /// The process-unique owner identifier recorded in the lease file.
    pub owner: String,
}

/// Counters for lock-acquisition outcomes, surfaced at `/metrics`.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Acquisitions that stole an expired lease.
    pub stolen: AtomicU64,
    /// Acquisitions that found the lease already expired (always paired
    /// with a `stolen` increment; counted separately per spec §4.5).
    pub expired: AtomicU64,
    /// Acquisitions rejected because the lease was actively held.
    pub contention: AtomicU64,
}

/// Manages file-based leases under `lock_dir`, plus the process-local
/// registry of outstanding handles used at shutdown to force-release every
/// lease this process created.
pub struct LeaseLockManager {
    lock_dir: PathBuf,
    fs: GuardedFs,
    clock: Arc<dyn Clock>,
    registry: DashMap<String, LockHandle>,
    stats: LockStats,
}

impl LeaseLockManager {
    /// Construct a manager rooted at `lock_dir`, using `fs` as its
    /// dedicated (non-general-pool) filesystem guard.
    pub fn new(lock_dir: PathBuf, fs: GuardedFs, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            lock_dir,
            fs,
            clock,
            registry: DashMap::new(),
            stats: LockStats::default(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.lock_dir.join(format!("{key}.lock"))
    }

    /// Attempt to acquire the lease for `key`, valid for `ttl_ms` and owned
    /// by `owner`. See spec §4.5 for the exclusive-create / steal-on-expiry
    /// algorithm.
    pub async fn acquire(&self, key: &str, ttl_ms: u64, owner: &str) -> Result<LockHandle, LockError> {
        self.fs.ensure_dir(&self.lock_dir).await.map_err(|e| LockError::Io(std::io::Error::other(e.to_string())))?;
        let handle = self.try_acquire_once(key, ttl_ms, owner, false).await?;
        self.registry.insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    async fn try_acquire_once(
        &self,
        key: &str,
        ttl_ms: u64,
        owner: &str,
        is_retry: bool,
    ) -> Result<LockHandle, LockError> {
        let path = self.path_for(key);
        let now = self.clock.now();
        let lease = LockLease {
            key: key.to_string(),
            owner: owner.to_string(),
            expires_at: now + ChronoDuration::milliseconds(ttl_ms as i64),
        };

        match self.create_exclusive(&path, &lease).await {
            Ok(()) => {
                debug!(key, owner, "acquired lease");
                return Ok(LockHandle {
                    key: key.to_string(),
                    owner: owner.to_string(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(LockError::Io(e)),
        }

        // The file exists. Inspect it to decide between stealing an
        // expired lease and reporting contention.
        let existing: Option<LockLease> = self.fs.read_json(&path).await.ok();

        match existing {
            None => {
                // Unparseable (or vanished mid-read): treat as non-existent.
                let _ = self.fs.delete_file(&path).await;
                if is_retry {
                    return Err(LockError::RaceDuringRetry { key: key.to_string() });
                }
                return Box::pin(self.try_acquire_once(key, ttl_ms, owner, true)).await;
            }
            Some(existing) if existing.expires_at < now => {
                let _ = self.fs.delete_file(&path).await;
                self.stats.stolen.fetch_add(1, Ordering::SeqCst);
                self.stats.expired.fetch_add(1, Ordering::SeqCst);
                if is_retry {
                    return Err(LockError::RaceDuringRetry { key: key.to_string() });
                }
                info!(key, "stealing expired lease");
                Box::pin(self.try_acquire_once(key, ttl_ms, owner, true)).await
            }
            Some(_) => {
                self.stats.contention.fetch_add(1, Ordering::SeqCst);
                Err(LockError::Held { key: key.to_string() })
            }
        }
    }

    async fn create_exclusive(&self, path: &PathBuf, lease: &LockLease) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let bytes = serde_json::to_vec_pretty(lease).expect("lease always serializes");
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Re-read the lease file, refuse (`LockLost`) on owner mismatch, else
    /// rewrite it with a new `expiresAt`.
    pub async fn renew(&self, handle: &LockHandle, ttl_ms: u64) -> Result<LockHandle, LockError> {
        let path = self.path_for(&handle.key);
        let current: LockLease = self
            .fs
            .read_json(&path)
            .await
            .map_err(|_| LockError::Lost {
                key: handle.key.clone(),
                reason: "lease file missing or unreadable at renew".to_string(),
            })?;

        if current.owner != handle.owner {
            return Err(LockError::Lost {
                key: handle.key.clone(),
                reason: "owner mismatch at renew".to_string(),
            });
        }

        let renewed = LockLease {
            key: handle.key.clone(),
            owner: handle.owner.clone(),
            expires_at: self.clock.now() + ChronoDuration::milliseconds(ttl_ms as i64),
        };
        self.fs
            .write_json_atomic(&path, &renewed)
            .await
            .map_err(|e| LockError::Io(std::io::Error::other(e.to_string())))?;
        Ok(handle.clone())
    }

    /// Release the lease, refusing on owner mismatch. A missing file is
    /// treated as already released.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        let path = self.path_for(&handle.key);
        if let Ok(current) = self.fs.read_json::<LockLease>(&path).await {
            if current.owner != handle.owner {
                return Err(LockError::Lost {
                    key: handle.key.clone(),
                    reason: "owner mismatch at release".to_string(),
                });
            }
        }
        let _ = self.fs.delete_file(&path).await;
        self.registry.remove(&handle.key);
        Ok(())
    }

    /// Whether `key` currently has a live (unexpired) lease.
    ///
    /// Side effect preserved from spec §9: this read-only probe removes
    /// expired lock files as opportunistic cleanup.
    pub async fn is_locked(&self, key: &str) -> bool {
        let path = self.path_for(key);
        match self.fs.read_json::<LockLease>(&path).await {
            Ok(lease) if lease.expires_at >= self.clock.now() => true,
            Ok(_) => {
                let _ = self.fs.delete_file(&path).await;
                false
            }
            Err(_) => false,
        }
    }

    /// Bypass owner checks and remove the lease unconditionally. Used only
    /// at shutdown.
    pub async fn force_release(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(e) = self.fs.delete_file(&path).await {
            warn!(key, error = %e, "failed to force-release lease file");
        }
        self.registry.remove(key);
    }

    /// Force-release every lease this process currently holds. Called once
    /// during graceful shutdown.
    pub async fn force_release_all(&self) {
        let keys: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.force_release(&key).await;
        }
    }

    /// Snapshot of acquisition counters, for `/metrics`.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.stolen.load(Ordering::SeqCst),
            self.stats.expired.load(Ordering::SeqCst),
            self.stats.contention.load(Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sl_types::clock::FrozenClock;
    use std::time::Duration;

    fn guarded_fs(clock: Arc<dyn Clock>) -> GuardedFs {
        GuardedFs::new(
            "test-locks",
            16,
            16,
            1000,
            Duration::from_secs(30),
            None,
            sl_ioguard::retry::RetryConfig { base_delay_ms: 1, times: 0, jitter_ms: 0 },
            clock,
            Arc::new(sl_types::jitter::DeterministicJitter::zero()),
        )
    }

    #[tokio::test]
    async fn acquire_then_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::new(Utc::now()));
        let manager = LeaseLockManager::new(dir.path().to_path_buf(), guarded_fs(clock.clone()), clock);

        let handle = manager.acquire("SKU1", 2000, "owner-a").await.unwrap();
        assert!(manager.is_locked("SKU1").await);
        manager.release(&handle).await.unwrap();
        assert!(!manager.is_locked("SKU1").await);
    }

    #[tokio::test]
    async fn contended_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::new(Utc::now()));
        let manager = LeaseLockManager::new(dir.path().to_path_buf(), guarded_fs(clock.clone()), clock);

        let _handle = manager.acquire("SKU1", 2000, "owner-a").await.unwrap();
        let second = manager.acquire("SKU1", 2000, "owner-b").await;
        assert!(matches!(second, Err(LockError::Held { .. })));
    }

    #[tokio::test]
    async fn expired_lease_can_be_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let manager = LeaseLockManager::new(dir.path().to_path_buf(), guarded_fs(clock_dyn.clone()), clock_dyn);

        let _handle = manager.acquire("SKU1", 100, "owner-a").await.unwrap();
        clock.advance_millis(200);
        let stolen = manager.acquire("SKU1", 2000, "owner-b").await.unwrap();
        assert_eq!(stolen.owner, "owner-b");
        let (stolen_count, expired_count, _) = manager.stats();
        assert_eq!(stolen_count, 1);
        assert_eq!(expired_count, 1);
    }

    #[tokio::test]
    async fn renew_with_wrong_owner_is_lock_lost() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::new(Utc::now()));
        let manager = LeaseLockManager::new(dir.path().to_path_buf(), guarded_fs(clock.clone()), clock);

        let _handle = manager.acquire("SKU1", 2000, "owner-a").await.unwrap();
        let impostor = LockHandle { key: "SKU1".to_string(), owner: "owner-b".to_string() };
        let result = manager.renew(&impostor, 2000).await;
        assert!(matches!(result, Err(LockError::Lost { .. })));
    }

    #[tokio::test]
    async fn force_release_all_clears_registry() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::new(Utc::now()));
        let manager = LeaseLockManager::new(dir.path().to_path_buf(), guarded_fs(clock.clone()), clock);

        manager.acquire("SKU1", 2000, "owner-a").await.unwrap();
        manager.acquire("SKU2", 2000, "owner-a").await.unwrap();
        manager.force_release_all().await;
        assert!(!manager.is_locked("SKU1").await);
        assert!(!manager.is_locked("SKU2").await);
    }
}
