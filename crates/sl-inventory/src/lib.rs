#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-inventory** – The per-`(storeId, sku)` inventory read model.
//!
//! This is the system's cache of the event log's truth: every mutation the
//! log accepts is folded into this store by the mutation service (in the
//! synchronous write path) and, for the central aggregate, by the sync
//! worker. `upsert` is last-writer-wins on the record — callers (the
//! mutation service) are responsible for supplying a correct `version`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sl_ioguard::guarded::GuardedFs;
use sl_types::error::ApiError;
use sl_types::record::InventoryRecord;
use tokio::sync::RwLock;

/// On-disk shape: `storeId -> sku -> record`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InventoryFile {
    #[serde(flatten)]
    stores: HashMap<String, HashMap<String, InventoryRecord>>,
}

/// The per-store inventory cache.
pub struct InventoryStore {
    path: PathBuf,
    fs: GuardedFs,
    state: RwLock<InventoryFile>,
}

impl InventoryStore {
    /// Load (or initialize empty) the inventory cache at `path`.
    pub async fn load(path: PathBuf, fs: GuardedFs) -> Result<Arc<Self>, ApiError> {
        let state = match fs.read_json::<InventoryFile>(&path).await {
            Ok(file) => file,
            Err(_) => InventoryFile::default(),
        };
        Ok(Arc::new(Self {
            path,
            fs,
            state: RwLock::new(state),
        }))
    }

    async fn persist(&self, file: &InventoryFile) -> Result<(), ApiError> {
        self.fs.write_json_atomic(&self.path, file).await.map_err(ApiError::from)
    }

    /// Look up a single record. Missing is `NotFound`.
    pub async fn get(&self, store_id: &str, sku: &str) -> Result<InventoryRecord, ApiError> {
        self.state
            .read()
            .await
            .stores
            .get(store_id)
            .and_then(|skus| skus.get(sku))
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                store_id: store_id.to_string(),
                sku: sku.to_string(),
            })
    }

    /// Look up a record without treating absence as an error.
    pub async fn get_optional(&self, store_id: &str, sku: &str) -> Option<InventoryRecord> {
        self.state.read().await.stores.get(store_id).and_then(|skus| skus.get(sku)).cloned()
    }

    /// Insert or overwrite `record` at its `(store_id, sku)` key.
    pub async fn upsert(&self, record: InventoryRecord) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        guard
            .stores
            .entry(record.store_id.clone())
            .or_default()
            .insert(record.sku.clone(), record);
        self.persist(&guard).await
    }

    /// All records for `store_id`, in no particular order.
    pub async fn list_by_store(&self, store_id: &str) -> Vec<InventoryRecord> {
        self.state
            .read()
            .await
            .stores
            .get(store_id)
            .map(|skus| skus.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a single record. A store mapping with no keys left is itself
    /// removed. Missing is `NotFound`.
    pub async fn delete(&self, store_id: &str, sku: &str) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        let removed = guard
            .stores
            .get_mut(store_id)
            .and_then(|skus| skus.remove(sku))
            .is_some();
        if !removed {
            return Err(ApiError::NotFound {
                store_id: store_id.to_string(),
                sku: sku.to_string(),
            });
        }
        if guard.stores.get(store_id).is_some_and(|skus| skus.is_empty()) {
            guard.stores.remove(store_id);
        }
        self.persist(&guard).await
    }

    /// All store identifiers that currently have at least one record.
    pub async fn list_stores(&self) -> Vec<String> {
        self.state.read().await.stores.keys().cloned().collect()
    }

    /// Total number of `(store, sku)` records across every store, for
    /// `/metrics`.
    pub async fn get_total_count(&self) -> usize {
        self.state.read().await.stores.values().map(|skus| skus.len()).sum()
    }

    /// Replace the entire in-memory cache (used when rebuilding the
    /// central aggregate from a snapshot) and persist it.
    pub async fn replace_all(&self, stores: HashMap<String, HashMap<String, InventoryRecord>>) -> Result<(), ApiError> {
        let mut guard = self.state.write().await;
        guard.stores = stores;
        self.persist(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sl_types::jitter::DeterministicJitter;
    use std::time::Duration;

    fn guarded_fs() -> GuardedFs {
        GuardedFs::new(
            "test-inventory",
            16,
            16,
            1000,
            Duration::from_secs(30),
            None,
            sl_ioguard::retry::RetryConfig { base_delay_ms: 1, times: 0, jitter_ms: 0 },
            Arc::new(sl_types::clock::SystemClock),
            Arc::new(DeterministicJitter::zero()),
        )
    }

    fn record(store_id: &str, sku: &str, qty: i64, version: u64) -> InventoryRecord {
        InventoryRecord {
            store_id: store_id.to_string(),
            sku: sku.to_string(),
            qty,
            version,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::load(dir.path().join("inv.json"), guarded_fs()).await.unwrap();
        let err = store.get("STORE1", "SKU1").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::load(dir.path().join("inv.json"), guarded_fs()).await.unwrap();
        store.upsert(record("STORE1", "SKU1", 10, 1)).await.unwrap();
        let fetched = store.get("STORE1", "SKU1").await.unwrap();
        assert_eq!(fetched.qty, 10);
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn delete_empties_store_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::load(dir.path().join("inv.json"), guarded_fs()).await.unwrap();
        store.upsert(record("STORE1", "SKU1", 10, 1)).await.unwrap();
        store.delete("STORE1", "SKU1").await.unwrap();
        assert!(store.list_stores().await.is_empty());
    }

    #[tokio::test]
    async fn list_by_store_returns_only_that_stores_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::load(dir.path().join("inv.json"), guarded_fs()).await.unwrap();
        store.upsert(record("STORE1", "SKU1", 10, 1)).await.unwrap();
        store.upsert(record("STORE1", "SKU2", 5, 1)).await.unwrap();
        store.upsert(record("STORE2", "SKU1", 3, 1)).await.unwrap();

        let store1_records = store.list_by_store("STORE1").await;
        assert_eq!(store1_records.len(), 2);
        assert_eq!(store.get_total_count().await, 3);
    }
}
