//! HTTP route handlers and the `Router` that wires them to `AppState`.

use std::future::Future;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sl_ioguard::error::IoGuardError;
use sl_mutation::MutationOutcome;
use sl_sync::SyncOutcome;
use sl_types::error::ApiError;
use sl_types::record::InventoryRecord;

use crate::error_response::AppError;
use crate::state::AppState;

/// Build the full HTTP surface over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/inventory/stores/:store_id/inventory/:sku", get(get_inventory))
        .route("/inventory/stores/:store_id/inventory/:sku/adjust", post(adjust))
        .route("/inventory/stores/:store_id/inventory/:sku/reserve", post(reserve))
        .route("/sync", post(sync_trigger))
        .route("/sync/status", get(sync_status))
        .route("/sync/start", post(sync_start))
        .route("/sync/stop", post(sync_stop))
        .with_state(state)
}

/// Admit one request through the rate limiter, the load shedder, and the
/// API bulkhead, in that order, then run `f`. Mirrors spec's admission
/// chain: client -> rate limit -> load shed -> bulkhead admit -> handler.
async fn admit<T, F, Fut>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    state.rate_limiter.check()?;
    let _shed_guard = state.load_shedder.enter()?;
    let result = state.api_bulkhead.run(f).await.map_err(|e: IoGuardError| AppError::from(e))?;
    Ok(result)
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthData {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    uptime_seconds: i64,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_request();
    let now = chrono::Utc::now();
    let uptime_seconds = (now - state.started_at).num_seconds().max(0);
    Json(Envelope {
        success: true,
        data: HealthData { status: "ok", timestamp: now, uptime_seconds },
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_request();
    let eventlog_stats = state.eventlog.stats().await;
    let (lock_stolen, lock_expired, lock_contention) = state
        .lock_manager
        .as_ref()
        .map(|m| m.stats())
        .unwrap_or((0, 0, 0));
    let bulkhead_stats = state.api_bulkhead.stats();

    Json(Envelope {
        success: true,
        data: json!({
            "requestsTotal": state.metrics.requests_total(),
            "errorsByCode": state.metrics.errors_by_code(),
            "eventLog": {
                "totalEvents": eventlog_stats.total_events,
                "eventsWithRetries": eventlog_stats.events_with_retries,
                "lastSequence": eventlog_stats.last_sequence,
            },
            "deadLetterCount": state.dead_letter.get_count().await,
            "inventoryRecordCount": state.inventory.get_total_count().await,
            "apiBulkhead": {
                "active": bulkhead_stats.active,
                "queued": bulkhead_stats.queued,
                "completed": bulkhead_stats.completed,
            },
            "loadShedderDepth": state.load_shedder.depth(),
            "lock": {
                "stolen": lock_stolen,
                "expired": lock_expired,
                "contention": lock_contention,
            },
            "sync": state.sync.status().await,
        }),
    })
}

async fn get_inventory(
    State(state): State<AppState>,
    Path((store_id, sku)): Path<(String, String)>,
) -> Result<Response, AppError> {
    state.metrics.record_request();
    let record = state.inventory.get(&store_id, &sku).await.map_err(|e| record_error(&state, e))?;
    let etag = format!("\"{}\"", record.version);
    let mut response = Json(record).into_response();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(axum::http::header::ETAG, value);
    }
    Ok(response)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustBody {
    delta: i64,
    expected_version: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveBody {
    qty: i64,
    expected_version: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    success: bool,
    new_quantity: i64,
    new_version: u64,
    record: InventoryRecord,
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn mutation_response(state: &AppState, store_id: &str, sku: &str, outcome: MutationOutcome) -> MutationResponse {
    let record = state
        .inventory
        .get(store_id, sku)
        .await
        .unwrap_or_else(|_| InventoryRecord {
            store_id: store_id.to_string(),
            sku: sku.to_string(),
            qty: outcome.qty,
            version: outcome.version,
            updated_at: chrono::Utc::now(),
        });
    MutationResponse { success: true, new_quantity: outcome.qty, new_version: outcome.version, record }
}

fn record_error(state: &AppState, err: ApiError) -> AppError {
    state.metrics.record_error(err.code());
    AppError::from(err)
}

async fn adjust(
    State(state): State<AppState>,
    Path((store_id, sku)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<AdjustBody>,
) -> Result<Json<MutationResponse>, AppError> {
    state.metrics.record_request();
    let key = idempotency_key(&headers);
    let mutation = state.mutation.clone();
    let outcome = admit(&state, || async {
        mutation
            .adjust_stock(&store_id, &sku, body.delta, body.expected_version, key.as_deref())
            .await
    })
    .await
    .map_err(|e| {
        if let AppError(inner) = &e {
            state.metrics.record_error(inner.code());
        }
        e
    })?;
    Ok(Json(mutation_response(&state, &store_id, &sku, outcome).await))
}

async fn reserve(
    State(state): State<AppState>,
    Path((store_id, sku)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ReserveBody>,
) -> Result<Json<MutationResponse>, AppError> {
    state.metrics.record_request();
    let key = idempotency_key(&headers);
    let mutation = state.mutation.clone();
    let outcome = admit(&state, || async {
        mutation
            .reserve_stock(&store_id, &sku, body.qty, body.expected_version, key.as_deref())
            .await
    })
    .await
    .map_err(|e| {
        if let AppError(inner) = &e {
            state.metrics.record_error(inner.code());
        }
        e
    })?;
    Ok(Json(mutation_response(&state, &store_id, &sku, outcome).await))
}

async fn sync_trigger(State(state): State<AppState>) -> Result<Json<SyncOutcomeView>, AppError> {
    state.metrics.record_request();
    let outcome = state.sync.trigger_once().await.map_err(|e| record_error(&state, e))?;
    Ok(Json(SyncOutcomeView::from(outcome)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutcomeView {
    success: bool,
    applied: usize,
    dead_lettered: usize,
    cursor: u64,
}

impl From<SyncOutcome> for SyncOutcomeView {
    fn from(outcome: SyncOutcome) -> Self {
        Self { success: true, applied: outcome.applied, dead_lettered: outcome.dead_lettered, cursor: outcome.cursor }
    }
}

async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_request();
    Json(Envelope { success: true, data: state.sync.status().await })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SyncStartBody {
    interval_ms: Option<u64>,
}

async fn sync_start(State(state): State<AppState>, body: Option<Json<SyncStartBody>>) -> impl IntoResponse {
    state.metrics.record_request();
    let interval_ms = body.map(|Json(b)| b.interval_ms).unwrap_or(None);
    state.sync.start(interval_ms).await;
    (StatusCode::OK, Json(Envelope { success: true, data: state.sync.status().await }))
}

async fn sync_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_request();
    state.sync.stop().await;
    (StatusCode::OK, Json(Envelope { success: true, data: state.sync.status().await }))
}
