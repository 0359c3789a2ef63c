//! HTTP-level end-to-end coverage: each test boots a full `AppState` over a
//! fresh temp directory and drives the router directly via
//! `tower::ServiceExt::oneshot`, no bound TCP listener needed.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sl_service::config::ServiceConfig;
use sl_service::{build_state, replay_on_boot, routes};
use tower::ServiceExt;

async fn router_over_fresh_dir(dir: &std::path::Path) -> Router {
    let config = ServiceConfig {
        data_dir: dir.to_path_buf(),
        concurrency_api: 32,
        concurrency_sync: 4,
        rate_limit_rps: 10_000,
        rate_limit_burst: 10_000,
        load_shed_queue_max: 10_000,
        ..ServiceConfig::default()
    };
    let state = build_state(&config).await.expect("state assembles");
    replay_on_boot(&state).await.expect("boot replay succeeds on an empty log");
    routes::build_router(state)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("router never errors at the service layer");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().method("GET").uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn adjust_happy_path_returns_new_quantity_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    let (status, body) = send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 10}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newQuantity"], 10);
    assert_eq!(body["newVersion"], 2);
}

#[tokio::test]
async fn stale_expected_version_is_rejected_as_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 5}))).await;

    let (status, body) =
        send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 5, "expectedVersion": 99}))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["name"], "Conflict");
}

#[tokio::test]
async fn reserving_more_than_available_is_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 5}))).await;

    let (status, body) = send(&app, post("/inventory/stores/STORE1/inventory/SKU1/reserve", json!({"qty": 10}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["name"], "InsufficientStock");
}

#[tokio::test]
async fn idempotency_key_replays_then_conflicts_on_a_different_payload() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    let mut first = post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 7}));
    first.headers_mut().insert("idempotency-key", "req-1".parse().unwrap());
    let (status1, body1) = send(&app, first).await;
    assert_eq!(status1, StatusCode::OK);

    let mut replay = post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 7}));
    replay.headers_mut().insert("idempotency-key", "req-1".parse().unwrap());
    let (status2, body2) = send(&app, replay).await;
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(body1["newQuantity"], body2["newQuantity"]);
    assert_eq!(body1["newVersion"], body2["newVersion"]);

    let mut conflicting = post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 9}));
    conflicting.headers_mut().insert("idempotency-key", "req-1".parse().unwrap());
    let (status3, body3) = send(&app, conflicting).await;
    assert_eq!(status3, StatusCode::CONFLICT);
    assert_eq!(body3["error"]["name"], "IdempotencyConflict");
}

#[tokio::test]
async fn concurrent_adjusts_on_one_sku_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let (status, _) = send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 1}))).await;
            status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let (status, record) = send(&app, get("/inventory/stores/STORE1/inventory/SKU1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["qty"], 100);
    assert_eq!(record["version"], 101);
}

#[tokio::test]
async fn boot_replay_picks_up_events_written_before_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let app = router_over_fresh_dir(dir.path()).await;
        send(&app, post("/inventory/stores/STORE1/inventory/SKU1/adjust", json!({"delta": 42}))).await;
        let (status, body) = send(&app, post("/sync", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], 1);
    }

    // Simulate a process restart against the same data directory: a fresh
    // `AppState` replays from the latest snapshot/log, not from memory.
    let app = router_over_fresh_dir(dir.path()).await;
    let (status, body) = send(&app, get("/sync/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cursor"], 1);

    let (status, record) = send(&app, get("/inventory/stores/STORE1/inventory/SKU1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["qty"], 42);
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");

    let (status, body) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["requestsTotal"].is_number());
}

#[tokio::test]
async fn unknown_sku_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = router_over_fresh_dir(dir.path()).await;

    let (status, body) = send(&app, get("/inventory/stores/STORE1/inventory/NOPE")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["name"], "NotFound");
}
