//! Project lifecycle endpoints.

use super::common::{format_optional, format_timestamp, parse_uuid, read_json_body};
use crate::context::get_actor;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use custodian_core::OperationalState;
use custodian_metadata::models::ProjectRow;
use custodian_metadata::repos::LifecycleOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub name: String,
    pub operational_state: String,
    pub admin_status: String,
    pub created_at: String,
    pub updated_at: String,
    pub ready_at: Option<String>,
    pub archived_at: Option<String>,
    pub closed_at: Option<String>,
}

impl TryFrom<ProjectRow> for ProjectResponse {
    type Error = ApiError;

    fn try_from(row: ProjectRow) -> ApiResult<Self> {
        Ok(Self {
            id: row.id.to_string(),
            owner_id: row.owner_id.to_string(),
            slug: row.slug,
            name: row.name,
            operational_state: row.operational_state,
            admin_status: row.admin_status,
            created_at: format_timestamp(row.created_at)?,
            updated_at: format_timestamp(row.updated_at)?,
            ready_at: format_optional(row.ready_at)?,
            archived_at: format_optional(row.archived_at)?,
            closed_at: format_optional(row.closed_at)?,
        })
    }
}

/// Result of a transition or close request.
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub success: bool,
    pub noop: bool,
    pub audit_event_id: String,
    pub project: ProjectResponse,
}

impl TryFrom<LifecycleOutcome> for LifecycleResponse {
    type Error = ApiError;

    fn try_from(outcome: LifecycleOutcome) -> ApiResult<Self> {
        Ok(Self {
            success: true,
            noop: outcome.noop,
            audit_event_id: outcome.audit_event.event_id.to_string(),
            project: outcome.project.try_into()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub owner_id: String,
    pub slug: String,
    pub name: String,
}

/// POST /v1/admin/projects - Create a project.
pub async fn create_project(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let body: CreateProjectRequest = read_json_body(req).await?;
    let owner_id = parse_uuid(&body.owner_id, "owner_id")?;

    let project = state
        .lifecycle()
        .create_project(owner_id, &body.slug, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(project.try_into()?)))
}

/// GET /v1/admin/projects/{id} - Get a project.
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let project_id = parse_uuid(&project_id, "project_id")?;
    let project = state.lifecycle().get_project(project_id).await?;
    Ok(Json(project.try_into()?))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target: String,
}

/// POST /v1/admin/projects/{id}/transition - Change `operational_state`.
pub async fn transition_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    req: Request,
) -> ApiResult<Json<LifecycleResponse>> {
    let project_id = parse_uuid(&project_id, "project_id")?;
    let actor = get_actor(&req).map(str::to_string);
    let body: TransitionRequest = read_json_body(req).await?;
    let target = OperationalState::parse(&body.target)?;

    let outcome = state
        .lifecycle()
        .transition(project_id, target, actor.as_deref())
        .await?;
    Ok(Json(outcome.try_into()?))
}

#[derive(Debug, Deserialize)]
pub struct CloseProjectRequest {
    #[serde(default)]
    pub reason: String,
}

/// POST /v1/admin/projects/{id}/close - Close a project.
pub async fn close_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    req: Request,
) -> ApiResult<Json<LifecycleResponse>> {
    let project_id = parse_uuid(&project_id, "project_id")?;
    let actor = get_actor(&req).map(str::to_string);
    let body: CloseProjectRequest = read_json_body(req).await?;

    let outcome = state
        .lifecycle()
        .close(project_id, &body.reason, actor.as_deref())
        .await?;
    Ok(Json(outcome.try_into()?))
}

#[derive(Debug, Serialize)]
pub struct HardDeleteResponse {
    pub deleted: bool,
    pub project_id: String,
    pub slug: String,
    pub audit_event_id: String,
}

/// DELETE /v1/admin/projects/{id} - Hard delete a closed project.
pub async fn hard_delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    req: Request,
) -> ApiResult<Json<HardDeleteResponse>> {
    let project_id = parse_uuid(&project_id, "project_id")?;
    let actor = get_actor(&req);

    let outcome = state.lifecycle().hard_delete(project_id, actor).await?;
    Ok(Json(HardDeleteResponse {
        deleted: true,
        project_id: outcome.project.id.to_string(),
        slug: outcome.project.slug,
        audit_event_id: outcome.audit_event.event_id.to_string(),
    }))
}
