//! Cleanup job endpoints. `GET` previews, `POST` executes one batch.

use super::common::read_json_body;
use crate::cleanup::{CleanupPreview, CleanupReport};
use crate::context::get_actor;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, Request, State};
use custodian_core::CleanupJob;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ExecuteCleanupRequest {
    /// Must equal the job's confirmation phrase exactly.
    #[serde(default)]
    pub confirm_text: String,
    #[serde(default)]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotPreviewParams {
    pub retention_days: Option<u32>,
}

async fn execute(
    state: &AppState,
    job: CleanupJob,
    req: Request,
) -> ApiResult<Json<CleanupReport>> {
    let actor = get_actor(&req).map(str::to_string);
    let body: ExecuteCleanupRequest = read_json_body(req).await?;

    let report = state
        .cleanup_runner()
        .execute(job, &body.confirm_text, body.retention_days, actor.as_deref())
        .await?;
    Ok(Json(report))
}

/// GET /v1/admin/cleanup/ghost-files - Dry run.
pub async fn preview_ghost_cleanup(
    State(state): State<AppState>,
) -> ApiResult<Json<CleanupPreview>> {
    let preview = state
        .cleanup_runner()
        .dry_run(CleanupJob::GhostFiles, None)
        .await?;
    Ok(Json(preview))
}

/// POST /v1/admin/cleanup/ghost-files - Delete one batch of ghost records.
pub async fn execute_ghost_cleanup(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CleanupReport>> {
    execute(&state, CleanupJob::GhostFiles, req).await
}

/// GET /v1/admin/cleanup/storage-snapshots - Dry run.
pub async fn preview_snapshot_cleanup(
    State(state): State<AppState>,
    Query(params): Query<SnapshotPreviewParams>,
) -> ApiResult<Json<CleanupPreview>> {
    let preview = state
        .cleanup_runner()
        .dry_run(CleanupJob::StorageSnapshots, params.retention_days)
        .await?;
    Ok(Json(preview))
}

/// POST /v1/admin/cleanup/storage-snapshots - Delete one batch of expired snapshots.
pub async fn execute_snapshot_cleanup(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CleanupReport>> {
    execute(&state, CleanupJob::StorageSnapshots, req).await
}
