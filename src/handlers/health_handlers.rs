//! Liveness and readiness.
//!
//! Readiness checks the two things an upload needs to complete: a database
//! that answers, and an artifact directory that accepts a temp-file write the
//! same way finalization does.

use crate::services::file_service::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

const MARKER: &[u8] = b"chunk-store readiness";

/// `GET /healthz`. No I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when both checks pass, 503 otherwise. The body also reports how many
/// uploads are buffered and how many evicted ids are still tombstoned.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let database = database_check(&service.db).await;
    let storage = disk_check(&service.base_path).await;
    let ready = database.is_ok() && storage.is_ok();
    if !ready {
        warn!(?database, ?storage, "readiness check failed");
    }

    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        database: database.into(),
        storage: storage.into(),
        uploads_in_flight: service.coordinator.in_flight().await,
        abandoned_uploads: service.coordinator.abandoned_count().await,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn database_check(db: &SqlitePool) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => Ok(()),
        Ok(other) => Err(format!("unexpected result: {other}")),
        Err(err) => Err(err.to_string()),
    }
}

/// Create the artifact directory if needed, then write, read back and remove
/// a `.tmp-` file inside it.
async fn disk_check(base: &Path) -> Result<(), String> {
    fs::create_dir_all(base)
        .await
        .map_err(|err| format!("cannot create {}: {err}", base.display()))?;

    let tmp_path = base.join(format!(".tmp-{}", Uuid::new_v4()));
    fs::write(&tmp_path, MARKER)
        .await
        .map_err(|err| format!("cannot write temp file: {err}"))?;
    let read = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;

    match read {
        Ok(bytes) if bytes == MARKER => {
            removed.map_err(|err| format!("cannot remove temp file: {err}"))
        }
        Ok(_) => Err("temp file read back different bytes".into()),
        Err(err) => Err(format!("cannot read temp file: {err}")),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyResponse {
    status: &'static str,
    database: CheckStatus,
    storage: CheckStatus,
    uploads_in_flight: usize,
    abandoned_uploads: usize,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}
