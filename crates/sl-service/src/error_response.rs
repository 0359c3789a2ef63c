//! Maps [`ApiError`] onto the wire error shape and HTTP status/headers.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sl_types::error::ApiError;

/// Wraps [`ApiError`] so this crate can impl `IntoResponse` on it without
/// running afoul of the orphan rule (both the trait and `ApiError` are
/// foreign to this crate).
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError(err)
    }
}

impl From<sl_ioguard::error::IoGuardError> for AppError {
    fn from(err: sl_ioguard::error::IoGuardError) -> Self {
        AppError(ApiError::from(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    name: &'static str,
    message: String,
    code: &'static str,
    #[serde(rename = "statusCode")]
    status_code: u16,
    timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = &self.0;
        let status_code = err.status_code();
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                name: err.code(),
                message: err.to_string(),
                code: err.code(),
                status_code,
                timestamp: Utc::now(),
                details: serde_json::to_value(err).ok(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after_ms) = err.retry_after_ms() {
            let seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        if let Some(lock_key) = err.lock_key() {
            if let Ok(value) = HeaderValue::from_str(lock_key) {
                response.headers_mut().insert("x-lock-key", value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let err = AppError(ApiError::Conflict {
            sku: "SKU1".to_string(),
            store_id: "STORE1".to_string(),
            expected: 1,
            current: 2,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn insufficient_stock_maps_to_422() {
        let err = AppError(ApiError::InsufficientStock {
            sku: "SKU1".to_string(),
            store_id: "STORE1".to_string(),
            requested: 10,
            available: 5,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn lock_rejection_carries_lock_key_and_retry_after_headers() {
        let err = AppError(ApiError::LockRejection { key: "SKU1".to_string(), retry_after_ms: 300 });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("x-lock-key").unwrap(), "SKU1");
        assert!(response.headers().get(axum::http::header::RETRY_AFTER).is_some());
    }
}
