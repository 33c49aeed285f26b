//! Storage reconciliation endpoints.

use super::common::{parse_uuid, read_json_body};
use crate::context::get_actor;
use crate::error::ApiResult;
use crate::reconcile::ReconcileReport;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, Request, State};
use custodian_core::ReconcileRequest;
use custodian_metadata::repos::TableStats;
use serde::{Deserialize, Serialize};

/// POST /v1/admin/reconcile/storage - Count or invalidate missing resources.
///
/// Body defaults to a dry run over all projects.
pub async fn reconcile_storage(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ReconcileReport>> {
    let actor = get_actor(&req).map(str::to_string);
    let body: ReconcileRequest = read_json_body(req).await?;

    let report = state
        .reconcile_engine()
        .run(&body, actor.as_deref())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileStatsParams {
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileStatsResponse {
    pub project_id: Option<String>,
    pub tables: Vec<TableStats>,
}

/// GET /v1/admin/reconcile/stats - Missing and invalidated counts per table.
pub async fn reconcile_stats(
    State(state): State<AppState>,
    Query(params): Query<ReconcileStatsParams>,
) -> ApiResult<Json<ReconcileStatsResponse>> {
    let project_id = params
        .project_id
        .as_deref()
        .map(|id| parse_uuid(id, "project_id"))
        .transpose()?;

    let tables = state.reconcile_engine().stats(project_id).await?;
    Ok(Json(ReconcileStatsResponse {
        project_id: project_id.map(|id| id.to_string()),
        tables,
    }))
}
