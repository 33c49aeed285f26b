//! Job execution tracking.
//!
//! Every execute-mode administrative run opens a `running` row before doing
//! any work and closes it exactly once as `success` or `failed`. The rows are
//! the rate limiter's source of truth and the operator's job history.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use custodian_core::config::JobsConfig;
use custodian_core::job::{KNOWN_ADMIN_JOBS, MANUAL_ADMIN_JOB_TYPE, truncate_error_message};
use custodian_core::{Clock, JobStatus};
use custodian_metadata::MetadataStore;
use custodian_metadata::models::{AuditEventRow, JobExecutionRow};
use custodian_metadata::repos::{JobFinish, JobKpis};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Error recorded on runs found `running` at start-up.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Failed runs listed in the overview.
const OVERVIEW_FAILURE_LIMIT: u32 = 20;

/// An open execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub job_id: String,
    pub started_at: OffsetDateTime,
}

/// Jobs dashboard data for one look-back window.
#[derive(Debug, Clone)]
pub struct JobsOverview {
    pub window_hours: u32,
    pub kpis: JobKpis,
    /// Latest run of each known admin job, `None` if it never ran.
    pub last_runs: Vec<(&'static str, Option<JobExecutionRow>)>,
    pub recent_failures: Vec<JobExecutionRow>,
}

/// Result of pruning the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct PruneOutcome {
    pub deleted_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff: OffsetDateTime,
    pub retention_days: u32,
}

/// Opens, closes and queries job executions.
#[derive(Clone)]
pub struct JobTracker {
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    error_max_len: usize,
}

impl JobTracker {
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, error_max_len: usize) -> Self {
        Self {
            metadata,
            clock,
            error_max_len,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }

    /// Commit a `running` row for `job_id`.
    pub async fn start(&self, job_id: &str, module: &str) -> ApiResult<ExecutionHandle> {
        let started_at = self.clock.now_utc();
        let row = JobExecutionRow::running(job_id, MANUAL_ADMIN_JOB_TYPE, module, started_at);
        self.metadata.start_job_execution(&row).await?;

        tracing::info!(
            job_id = %job_id,
            execution_id = %row.execution_id,
            "Job execution started"
        );

        Ok(ExecutionHandle {
            execution_id: row.execution_id,
            job_id: job_id.to_string(),
            started_at,
        })
    }

    /// Close the execution as `success` with a JSON summary.
    pub async fn finish_success<S: Serialize>(
        &self,
        handle: &ExecutionHandle,
        summary: &S,
    ) -> ApiResult<()> {
        let summary = serde_json::to_string(summary)
            .map_err(|e| ApiError::Internal(format!("failed to encode job summary: {e}")))?;
        let finished_at = self.clock.now_utc();
        let duration_ms = elapsed_ms(handle.started_at, finished_at);

        self.metadata
            .finish_job_execution(
                handle.execution_id,
                &JobFinish {
                    status: JobStatus::Success,
                    finished_at,
                    duration_ms,
                    result_summary: Some(&summary),
                    error_message: None,
                },
            )
            .await?;

        self.record_committed_success(handle, finished_at);
        Ok(())
    }

    /// Account for a success row that was written inside another transaction.
    pub fn record_committed_success(&self, handle: &ExecutionHandle, finished_at: OffsetDateTime) {
        let duration_ms = elapsed_ms(handle.started_at, finished_at);
        metrics::record_job_execution(&handle.job_id, JobStatus::Success.as_str(), duration_ms);
        tracing::info!(
            job_id = %handle.job_id,
            execution_id = %handle.execution_id,
            duration_ms = duration_ms,
            "Job execution succeeded"
        );
    }

    /// Close the execution as `failed`. The stored message is truncated.
    ///
    /// A failure to record the failure is logged; the caller is already
    /// propagating the original error.
    pub async fn finish_failed(&self, handle: &ExecutionHandle, error: &ApiError) {
        let message = truncate_error_message(&error.to_string(), self.error_max_len);
        let finished_at = self.clock.now_utc();
        let duration_ms = elapsed_ms(handle.started_at, finished_at);

        let result = self
            .metadata
            .finish_job_execution(
                handle.execution_id,
                &JobFinish {
                    status: JobStatus::Failed,
                    finished_at,
                    duration_ms,
                    result_summary: None,
                    error_message: Some(&message),
                },
            )
            .await;

        metrics::record_job_execution(&handle.job_id, JobStatus::Failed.as_str(), duration_ms);

        match result {
            Ok(()) => tracing::error!(
                job_id = %handle.job_id,
                execution_id = %handle.execution_id,
                error = %message,
                "Job execution failed"
            ),
            Err(e) => tracing::error!(
                job_id = %handle.job_id,
                execution_id = %handle.execution_id,
                error = %message,
                record_error = %e,
                "Job execution failed and the failure could not be recorded"
            ),
        }
    }

    /// Mark runs left `running` by a previous process as failed.
    ///
    /// Only runs older than `stale_after` are touched. Younger ones may belong
    /// to another instance sharing the database and still guard its cooldown;
    /// a later start recovers them if they never finish.
    pub async fn recover_interrupted(&self, stale_after: Duration) -> ApiResult<usize> {
        let now = self.clock.now_utc();
        let Some(started_before) = now.checked_sub(stale_after) else {
            return Ok(0);
        };
        let recovered = self
            .metadata
            .fail_running_job_executions(started_before, now, INTERRUPTED_BY_RESTART)
            .await?;

        for execution in &recovered {
            tracing::warn!(
                job_id = %execution.job_id,
                execution_id = %execution.execution_id,
                started_at = %execution.started_at,
                "Marked interrupted job execution as failed"
            );
        }
        Ok(recovered.len())
    }

    /// Executions in the last `hours`, newest first.
    pub async fn list_recent(
        &self,
        config: &JobsConfig,
        hours: Option<u32>,
        limit: Option<u32>,
    ) -> ApiResult<Vec<JobExecutionRow>> {
        let since = self.window_start(config, hours)?;
        let limit = limit.unwrap_or(config.recent_limit);
        if limit == 0 || limit > config.max_recent_limit {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {}",
                config.max_recent_limit
            )));
        }
        Ok(self.metadata.list_job_executions(since, limit).await?)
    }

    pub async fn overview(&self, config: &JobsConfig, hours: Option<u32>) -> ApiResult<JobsOverview> {
        let window_hours = hours.unwrap_or(config.window_hours);
        let since = self.window_start(config, hours)?;

        let kpis = self.metadata.job_execution_kpis(since).await?;

        let mut last_runs = Vec::with_capacity(KNOWN_ADMIN_JOBS.len());
        for job_id in KNOWN_ADMIN_JOBS {
            last_runs.push((job_id, self.metadata.latest_job_execution(job_id).await?));
        }

        let recent_failures = self
            .metadata
            .list_failed_job_executions(since, OVERVIEW_FAILURE_LIMIT)
            .await?;

        Ok(JobsOverview {
            window_hours,
            kpis,
            last_runs,
            recent_failures,
        })
    }

    /// Delete finished executions older than the retention window.
    pub async fn prune(
        &self,
        config: &JobsConfig,
        retention_days: Option<u32>,
        actor_id: Option<&str>,
    ) -> ApiResult<PruneOutcome> {
        let retention_days = config.prune_policy().resolve(retention_days)?;
        let now = self.clock.now_utc();
        let cutoff = now - Duration::days(i64::from(retention_days));

        let audit = AuditEventRow::new(
            None,
            actor_id,
            "job_executions_prune",
            format!("prune job executions started before {cutoff}"),
            serde_json::json!({ "retention_days": retention_days }),
            now,
        )?;
        self.metadata
            .record_audit_event(&audit)
            .await
            .map_err(ApiError::from)
            .inspect_err(metrics::record_audit_failure)?;

        let deleted_count = self.metadata.prune_job_executions(cutoff).await?;
        tracing::info!(
            deleted = deleted_count,
            retention_days = retention_days,
            "Pruned job executions"
        );

        Ok(PruneOutcome {
            deleted_count,
            cutoff,
            retention_days,
        })
    }

    fn window_start(&self, config: &JobsConfig, hours: Option<u32>) -> ApiResult<OffsetDateTime> {
        let hours = hours.unwrap_or(config.window_hours);
        if hours == 0 || hours > config.max_window_hours {
            return Err(ApiError::Validation(format!(
                "hours must be between 1 and {}",
                config.max_window_hours
            )));
        }
        Ok(self.clock.now_utc() - Duration::hours(i64::from(hours)))
    }
}

fn elapsed_ms(started_at: OffsetDateTime, finished_at: OffsetDateTime) -> i64 {
    let ms = (finished_at - started_at).whole_milliseconds().max(0);
    i64::try_from(ms).unwrap_or(i64::MAX)
}
