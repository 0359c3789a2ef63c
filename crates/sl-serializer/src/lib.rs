#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-serializer** – In-process per-key FIFO mutual exclusion.
//!
//! Guarantees at most one `run` closure per key executes at a time within
//! this process. This is distinct from `sl-lock`'s cross-process lease:
//! the serializer has no durability and no TTL, it just keeps two
//! concurrent requests for the same SKU in this process from interleaving
//! their read-modify-write of the inventory record.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A process-local registry of per-key FIFO mutexes.
///
/// Tokio's `Mutex` queues waiters in arrival order, so `run` callers are
/// served FIFO per key. Entries are opportunistically removed once no
/// other task still references the same per-key mutex.
pub struct KeySerializer {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeySerializer {
    /// Construct an empty serializer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { locks: DashMap::new() })
    }

    /// Run `f` while holding the exclusive lock for `key`. Only one `run`
    /// call per key executes its closure at a time within this process.
    pub async fn run<T, F, Fut>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock().await;
        let result = f().await;
        drop(guard);

        // Opportunistic GC: if nobody else holds a reference to this
        // key's mutex (this serializer's map entry plus our local clone
        // make 2; if strong_count is still 2 after dropping ours below,
        // nothing raced in concurrently), remove the map entry.
        drop(mutex);
        self.locks.remove_if(key, |_, m| Arc::strong_count(m) == 1);

        result
    }

    /// Number of keys currently tracked (held or merely GC-pending), for
    /// `/metrics`.
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_access_to_same_key() {
        let serializer = KeySerializer::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let serializer = serializer.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                serializer
                    .run("SKU1", || async {
                        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let serializer = KeySerializer::new();
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let b1 = barrier.clone();
        let s1 = serializer.clone();
        let h1 = tokio::spawn(async move {
            s1.run("SKU1", || async move {
                b1.wait().await;
            })
            .await;
        });

        let b2 = barrier.clone();
        let s2 = serializer.clone();
        let h2 = tokio::spawn(async move {
            s2.run("SKU2", || async move {
                b2.wait().await;
            })
            .await;
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            h1.await.unwrap();
            h2.await.unwrap();
        })
        .await
        .expect("distinct keys must not deadlock on each other");
    }

    #[tokio::test]
    async fn map_entry_is_garbage_collected_after_use() {
        let serializer = KeySerializer::new();
        serializer.run("SKU1", || async {}).await;
        assert_eq!(serializer.len(), 0);
    }
}
