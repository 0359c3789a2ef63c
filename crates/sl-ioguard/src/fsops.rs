//! Atomic JSON file I/O primitives.
//!
//! These are plain async functions, independent of the bulkhead/breaker —
//! callers compose them through [`crate::guarded::GuardedFs`].

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::IoGuardError;

/// Read and parse a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IoGuardError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Whether a file exists at `path`.
pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Create `path` and all missing parent directories.
pub async fn ensure_dir(path: &Path) -> Result<(), IoGuardError> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Remove a file if it exists; a missing file is not an error.
pub async fn delete_file(path: &Path) -> Result<(), IoGuardError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` to pretty-printed JSON and write it directly (not
/// atomically) to `path`. Used only for writes that don't need crash
/// atomicity; prefer [`write_json_atomic`] for durable state.
pub async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), IoGuardError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Serialize `value` to pretty-printed JSON, write it to a sibling temp
/// file with a random suffix, then rename over `path`.
///
/// On any failure the temp file is best-effort removed; cleanup failures
/// are swallowed (logged at `warn`, never propagated) since the original
/// failure is already the one that matters to the caller.
pub async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), IoGuardError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = sibling_temp_path(path);

    let result = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = &result {
        if let Err(cleanup_err) = tokio::fs::remove_file(&tmp_path).await {
            if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %cleanup_err, "failed to clean up temp file after write failure");
            }
        }
        return Err(IoGuardError::Io(std::io::Error::new(e.kind(), e.to_string())));
    }

    Ok(())
}

fn sibling_temp_path(path: &Path) -> std::path::PathBuf {
    let suffix = Uuid::new_v4();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    let tmp_name = format!(".{file_name}.{suffix}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => std::path::PathBuf::from(tmp_name),
    }
}
