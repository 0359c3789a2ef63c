//! Idempotency-key bookkeeping shared between `sl-idempotency` and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a cached idempotent result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Work has been admitted but has not committed yet.
    Pending,
    /// Work committed; `cached_result` holds the response to replay.
    Completed,
    /// Work failed terminally; replays should also fail.
    Failed,
}

/// A single idempotency-key cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyEntry {
    /// The caller-supplied `Idempotency-Key`.
    pub request_key: String,
    /// Canonical-order JSON fingerprint of the request payload.
    pub payload_fingerprint: String,
    /// The result to replay once `status == Completed`.
    pub cached_result: Option<Value>,
    /// Current lifecycle state.
    pub status: IdempotencyStatus,
    /// Absolute expiry; entries are inert (treated as absent) past this.
    pub expires_at: DateTime<Utc>,
}

/// Canonicalize a JSON value by recursively sorting object keys, then
/// serialize it. Property order in the input must not affect the result.
pub fn canonical_fingerprint(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).expect("canonicalized value always serializes")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_order_independent() {
        let a = json!({"delta": 5, "expectedVersion": 3});
        let b = json!({"expectedVersion": 3, "delta": 5});
        assert_eq!(canonical_fingerprint(&a), canonical_fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_sensitive_to_value_changes() {
        let a = json!({"delta": 5});
        let b = json!({"delta": 6});
        assert_ne!(canonical_fingerprint(&a), canonical_fingerprint(&b));
    }

    #[test]
    fn fingerprint_sorts_nested_objects() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});
        assert_eq!(canonical_fingerprint(&a), canonical_fingerprint(&b));
    }
}
