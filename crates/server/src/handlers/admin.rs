//! Health, job execution log and audit ledger endpoints.

use super::common::{format_optional, format_timestamp, parse_uuid, read_json_body};
use crate::context::get_actor;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tracker::PruneOutcome;
use axum::Json;
use axum::extract::{Query, Request, State};
use custodian_metadata::models::{AuditEventRow, JobExecutionRow};
use custodian_metadata::repos::{AuditQuery, JobKpis};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Job execution as returned by the API.
#[derive(Debug, Serialize)]
pub struct JobExecutionResponse {
    pub execution_id: String,
    pub job_id: String,
    pub job_type: String,
    pub module: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub result_summary: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl TryFrom<JobExecutionRow> for JobExecutionResponse {
    type Error = ApiError;

    fn try_from(row: JobExecutionRow) -> ApiResult<Self> {
        // A summary that no longer parses is still shown, as a string.
        let result_summary = row.result_summary.map(|s| {
            serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
        });
        Ok(Self {
            execution_id: row.execution_id.to_string(),
            job_id: row.job_id,
            job_type: row.job_type,
            module: row.module,
            status: row.status,
            started_at: format_timestamp(row.started_at)?,
            finished_at: format_optional(row.finished_at)?,
            duration_ms: row.duration_ms,
            result_summary,
            error_message: row.error_message,
        })
    }
}

fn to_responses(rows: Vec<JobExecutionRow>) -> ApiResult<Vec<JobExecutionResponse>> {
    rows.into_iter().map(JobExecutionResponse::try_from).collect()
}

#[derive(Debug, Deserialize)]
pub struct JobsWindowParams {
    /// Look-back window in hours.
    pub hours: Option<u32>,
    pub limit: Option<u32>,
}

/// Latest run of one known job.
#[derive(Debug, Serialize)]
pub struct LastRunResponse {
    pub job_id: &'static str,
    /// `never_ran` when no execution exists.
    pub status: String,
    pub last_execution: Option<JobExecutionResponse>,
}

#[derive(Debug, Serialize)]
pub struct JobsOverviewResponse {
    pub window_hours: u32,
    pub kpis: JobKpis,
    pub last_runs: Vec<LastRunResponse>,
    pub recent_failures: Vec<JobExecutionResponse>,
}

/// GET /v1/admin/jobs - KPIs, last runs and recent failures.
pub async fn jobs_overview(
    State(state): State<AppState>,
    Query(params): Query<JobsWindowParams>,
) -> ApiResult<Json<JobsOverviewResponse>> {
    let overview = state
        .tracker()
        .overview(&state.config.jobs, params.hours)
        .await?;

    let last_runs = overview
        .last_runs
        .into_iter()
        .map(|(job_id, row)| {
            let status = row
                .as_ref()
                .map(|r| r.status.clone())
                .unwrap_or_else(|| "never_ran".to_string());
            Ok(LastRunResponse {
                job_id,
                status,
                last_execution: row.map(JobExecutionResponse::try_from).transpose()?,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(JobsOverviewResponse {
        window_hours: overview.window_hours,
        kpis: overview.kpis,
        last_runs,
        recent_failures: to_responses(overview.recent_failures)?,
    }))
}

/// GET /v1/admin/jobs/executions - Recent executions, newest first.
pub async fn list_job_executions(
    State(state): State<AppState>,
    Query(params): Query<JobsWindowParams>,
) -> ApiResult<Json<Vec<JobExecutionResponse>>> {
    let rows = state
        .tracker()
        .list_recent(&state.config.jobs, params.hours, params.limit)
        .await?;
    Ok(Json(to_responses(rows)?))
}

#[derive(Debug, Deserialize)]
pub struct PruneJobsRequest {
    #[serde(default)]
    pub retention_days: Option<u32>,
}

/// POST /v1/admin/jobs/prune - Delete finished executions past retention.
pub async fn prune_job_executions(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<PruneOutcome>> {
    let actor = get_actor(&req).map(str::to_string);
    let body: PruneJobsRequest = read_json_body(req).await?;

    let outcome = state
        .tracker()
        .prune(&state.config.jobs, body.retention_days, actor.as_deref())
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ListAuditParams {
    pub project_id: Option<String>,
    pub action_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AuditEventResponse {
    pub event_id: String,
    pub project_id: Option<String>,
    pub actor_id: Option<String>,
    pub action_type: String,
    pub details: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl TryFrom<AuditEventRow> for AuditEventResponse {
    type Error = ApiError;

    fn try_from(row: AuditEventRow) -> ApiResult<Self> {
        let metadata = row.metadata()?;
        Ok(Self {
            event_id: row.event_id.to_string(),
            project_id: row.project_id.map(|id| id.to_string()),
            actor_id: row.actor_id,
            action_type: row.action_type,
            details: row.details,
            metadata,
            created_at: format_timestamp(row.created_at)?,
        })
    }
}

/// GET /v1/admin/audit - Audit events, newest first.
pub async fn list_audit_events(
    State(state): State<AppState>,
    Query(params): Query<ListAuditParams>,
) -> ApiResult<Json<Vec<AuditEventResponse>>> {
    let project_id = params
        .project_id
        .as_deref()
        .map(|id| parse_uuid(id, "project_id"))
        .transpose()?;

    let query = AuditQuery {
        project_id,
        action_type: params.action_type,
        limit: params.limit.unwrap_or(100),
        offset: params.offset.unwrap_or(0),
    };

    let events = state.metadata.list_audit_events(&query).await?;
    let events = events
        .into_iter()
        .map(AuditEventResponse::try_from)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(events))
}
