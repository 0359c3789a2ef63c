#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-mutation** – The write path.
//!
//! `adjust_stock` and `reserve_stock` share one ten-step skeleton:
//! idempotency check, per-key serialization, optional cross-process lease,
//! optimistic-version check, quantity arithmetic, durable append, state
//! upsert, idempotency publish, release. The event log append precedes the
//! inventory upsert — the log is the truth, the inventory store is a cache
//! of it (write-ahead-log discipline).

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use sl_eventlog::EventLogStore;
use sl_idempotency::{CheckOutcome, IdempotencyStore};
use sl_inventory::InventoryStore;
use sl_lock::LeaseLockManager;
use sl_serializer::KeySerializer;
use sl_types::clock::Clock;
use sl_types::error::ApiError;
use sl_types::event::{Event, EventPayload, EventType, Operation};
use sl_types::record::InventoryRecord;
use tracing::{info, warn};

/// Tunables governing lock usage and idempotency retention. Mirrors the
/// `LOCK_*` / `IDEMP_TTL_MS` environment variables.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Whether the cross-process lease lock is consulted at all.
    pub locks_enabled: bool,
    /// Lease duration in milliseconds when acquired.
    pub lock_ttl_ms: u64,
    /// `Retry-After` value surfaced to callers on lock rejection.
    pub lock_retry_after_ms: u64,
    /// This process's lease owner identifier (`<pid>-<uuid>`).
    pub lock_owner_id: String,
    /// How long a completed idempotency entry is cached.
    pub idemp_ttl_ms: u64,
}

/// The externally-visible result of a successful mutation.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    /// Quantity after the mutation.
    pub qty: i64,
    /// Version after the mutation.
    pub version: u64,
}

/// The write path: owns every collaborator a mutation needs and exposes
/// `adjust_stock`/`reserve_stock` as its public contract.
pub struct MutationService {
    event_log: Arc<EventLogStore>,
    inventory: Arc<InventoryStore>,
    idempotency: Arc<IdempotencyStore>,
    serializer: Arc<KeySerializer>,
    lock_manager: Option<Arc<LeaseLockManager>>,
    clock: Arc<dyn Clock>,
    config: MutationConfig,
}

impl MutationService {
    /// Assemble the write path from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_log: Arc<EventLogStore>,
        inventory: Arc<InventoryStore>,
        idempotency: Arc<IdempotencyStore>,
        serializer: Arc<KeySerializer>,
        lock_manager: Option<Arc<LeaseLockManager>>,
        clock: Arc<dyn Clock>,
        config: MutationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_log,
            inventory,
            idempotency,
            serializer,
            lock_manager,
            clock,
            config,
        })
    }

    /// Apply a signed-delta adjustment. `expected_version`, if supplied,
    /// must match the current record's version or the call fails with
    /// `Conflict`.
    pub async fn adjust_stock(
        &self,
        store_id: &str,
        sku: &str,
        delta: i64,
        expected_version: Option<u64>,
        idempotency_key: Option<&str>,
    ) -> Result<MutationOutcome, ApiError> {
        let fingerprint_payload = json!({
            "op": "adjust",
            "storeId": store_id,
            "sku": sku,
            "delta": delta,
            "expectedVersion": expected_version,
        });

        self.run_mutation(
            store_id,
            sku,
            idempotency_key,
            fingerprint_payload,
            expected_version,
            move |record| {
                let new_qty = record.qty + delta;
                if new_qty < 0 {
                    return Err(ApiError::InsufficientStock {
                        sku: record.sku.clone(),
                        store_id: record.store_id.clone(),
                        requested: -delta,
                        available: record.qty,
                    });
                }
                Ok((new_qty, Operation::Adjust { delta }))
            },
        )
        .await
    }

    /// Reserve (decrement) a positive quantity. `qty` must be strictly
    /// positive; insufficient stock fails with `InsufficientStock`.
    pub async fn reserve_stock(
        &self,
        store_id: &str,
        sku: &str,
        qty: i64,
        expected_version: Option<u64>,
        idempotency_key: Option<&str>,
    ) -> Result<MutationOutcome, ApiError> {
        if qty <= 0 {
            return Err(ApiError::Validation {
                message: format!("reserve quantity must be positive, got {qty}"),
            });
        }

        let fingerprint_payload = json!({
            "op": "reserve",
            "storeId": store_id,
            "sku": sku,
            "qty": qty,
            "expectedVersion": expected_version,
        });

        self.run_mutation(
            store_id,
            sku,
            idempotency_key,
            fingerprint_payload,
            expected_version,
            move |record| {
                if record.qty < qty {
                    return Err(ApiError::InsufficientStock {
                        sku: record.sku.clone(),
                        store_id: record.store_id.clone(),
                        requested: qty,
                        available: record.qty,
                    });
                }
                Ok((record.qty - qty, Operation::Reserve { reserved_qty: qty }))
            },
        )
        .await
    }

    async fn run_mutation(
        &self,
        store_id: &str,
        sku: &str,
        idempotency_key: Option<&str>,
        fingerprint_payload: Value,
        expected_version: Option<u64>,
        compute: impl FnOnce(&InventoryRecord) -> Result<(i64, Operation), ApiError> + Send,
    ) -> Result<MutationOutcome, ApiError> {
        // Steps 1-10 all happen under the per-SKU serializer. The
        // idempotency check must not run ahead of this lock: two concurrent
        // requests carrying the same key would both observe a `Miss` and
        // each independently execute the mutation. Serializing the whole
        // check-mutate-publish sequence on `sku` closes that window — every
        // mutation against a SKU is already forced through this same lock,
        // so a second caller with a matching key sees the first caller's
        // `Completed` entry rather than racing into `mutate_locked`.
        self.serializer
            .run(sku, || {
                self.check_and_mutate(store_id, sku, idempotency_key, &fingerprint_payload, expected_version, compute)
            })
            .await
    }

    async fn check_and_mutate(
        &self,
        store_id: &str,
        sku: &str,
        idempotency_key: Option<&str>,
        fingerprint_payload: &Value,
        expected_version: Option<u64>,
        compute: impl FnOnce(&InventoryRecord) -> Result<(i64, Operation), ApiError> + Send,
    ) -> Result<MutationOutcome, ApiError> {
        if let Some(key) = idempotency_key {
            match self.idempotency.check(key, fingerprint_payload) {
                CheckOutcome::Hit { cached_result, .. } => {
                    if let Some(cached) = cached_result {
                        let outcome: MutationOutcome =
                            serde_json::from_value(cached).map_err(|e| ApiError::Internal {
                                message: format!("corrupt cached idempotency result: {e}"),
                            })?;
                        return Ok(outcome);
                    }
                }
                CheckOutcome::Conflict => {
                    return Err(ApiError::IdempotencyConflict { key: key.to_string() });
                }
                CheckOutcome::Miss => {}
            }
        }

        let result = self.mutate_locked(store_id, sku, expected_version, compute).await?;

        if let Some(key) = idempotency_key {
            self.idempotency.set(
                key,
                fingerprint_payload,
                Some(serde_json::to_value(result).expect("MutationOutcome always serializes")),
                sl_types::idempotency::IdempotencyStatus::Completed,
                self.config.idemp_ttl_ms,
            );
        }

        Ok(result)
    }

    async fn mutate_locked(
        &self,
        store_id: &str,
        sku: &str,
        expected_version: Option<u64>,
        compute: impl FnOnce(&InventoryRecord) -> Result<(i64, Operation), ApiError> + Send,
    ) -> Result<MutationOutcome, ApiError> {
        // Step 3: optional cross-process lease.
        let lock_handle = if self.config.locks_enabled {
            if let Some(manager) = &self.lock_manager {
                match manager
                    .acquire(sku, self.config.lock_ttl_ms, &self.config.lock_owner_id)
                    .await
                {
                    Ok(handle) => Some(handle),
                    Err(_) => {
                        return Err(ApiError::LockRejection {
                            key: sku.to_string(),
                            retry_after_ms: self.config.lock_retry_after_ms,
                        });
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        let result = self.mutate_inner(store_id, sku, expected_version, compute).await;

        // Release is attempted unconditionally regardless of outcome.
        if let (Some(manager), Some(handle)) = (&self.lock_manager, &lock_handle) {
            if let Err(e) = manager.release(handle).await {
                warn!(sku, error = %e, "failed to release lease after mutation");
            }
        }

        result
    }

    async fn mutate_inner(
        &self,
        store_id: &str,
        sku: &str,
        expected_version: Option<u64>,
        compute: impl FnOnce(&InventoryRecord) -> Result<(i64, Operation), ApiError> + Send,
    ) -> Result<MutationOutcome, ApiError> {
        let now = self.clock.now();

        // Step 4: read current state, synthesizing if this is the first
        // mutation this (store, sku) pair has ever seen.
        let current = self
            .inventory
            .get_optional(store_id, sku)
            .await
            .unwrap_or_else(|| InventoryRecord::synthesize(store_id, sku, now));

        // Step 5: optimistic concurrency check.
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(ApiError::Conflict {
                    sku: sku.to_string(),
                    store_id: store_id.to_string(),
                    expected,
                    current: current.version,
                });
            }
        }

        // Step 6: compute the new quantity and operation-specific payload.
        let (new_qty, operation) = compute(&current)?;
        let new_version = current.version + 1;

        let event_type = match operation {
            Operation::Adjust { .. } => EventType::StockAdjusted,
            Operation::Reserve { .. } => EventType::StockReserved,
        };
        let event = Event::new_unsequenced(
            event_type,
            EventPayload {
                sku: sku.to_string(),
                store_id: store_id.to_string(),
                previous_qty: current.qty,
                new_qty,
                previous_version: current.version,
                new_version,
                operation,
            },
            now,
        );

        // Step 7: append to the durable log. This must precede the state
        // upsert below — the log is the truth, the inventory store is a
        // cache of it.
        self.event_log.append(event).await?;

        // Step 8: upsert the cache.
        let updated = InventoryRecord {
            store_id: store_id.to_string(),
            sku: sku.to_string(),
            qty: new_qty,
            version: new_version,
            updated_at: now,
        };
        self.inventory.upsert(updated).await?;

        info!(store_id, sku, new_qty, new_version, "mutation committed");

        Ok(MutationOutcome {
            qty: new_qty,
            version: new_version,
        })
    }
}
