//! Job execution log repository.

use crate::error::MetadataResult;
use crate::models::JobExecutionRow;
use async_trait::async_trait;
use custodian_core::JobStatus;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Terminal update for a running execution.
#[derive(Debug, Clone)]
pub struct JobFinish<'a> {
    pub status: JobStatus,
    pub finished_at: OffsetDateTime,
    pub duration_ms: i64,
    pub result_summary: Option<&'a str>,
    pub error_message: Option<&'a str>,
}

/// Execution counts over a time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobKpis {
    pub failed: u64,
    pub success: u64,
    /// Running now, regardless of the window.
    pub running: u64,
    pub total: u64,
}

/// Repository for administrative job executions.
#[async_trait]
pub trait JobExecutionRepo: Send + Sync {
    /// Insert a `running` execution.
    async fn start_job_execution(&self, execution: &JobExecutionRow) -> MetadataResult<()>;

    /// Move a `running` execution to its terminal status.
    ///
    /// Returns `Constraint` if the execution is not running (already finished),
    /// `NotFound` if it does not exist.
    async fn finish_job_execution(
        &self,
        execution_id: Uuid,
        finish: &JobFinish<'_>,
    ) -> MetadataResult<()>;

    async fn get_job_execution(&self, execution_id: Uuid)
    -> MetadataResult<Option<JobExecutionRow>>;

    /// Most recent `running` or `success` execution of `job_id`.
    async fn latest_blocking_execution(
        &self,
        job_id: &str,
    ) -> MetadataResult<Option<JobExecutionRow>>;

    /// Most recent execution of `job_id` in any status.
    async fn latest_job_execution(&self, job_id: &str) -> MetadataResult<Option<JobExecutionRow>>;

    /// Executions started at or after `since`, newest first.
    async fn list_job_executions(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<JobExecutionRow>>;

    /// Failed executions with an error message started at or after `since`, newest first.
    async fn list_failed_job_executions(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<JobExecutionRow>>;

    async fn job_execution_kpis(&self, since: OffsetDateTime) -> MetadataResult<JobKpis>;

    /// Mark `running` executions started at or before `started_before` as
    /// failed. Used at start-up for runs interrupted by a restart.
    async fn fail_running_job_executions(
        &self,
        started_before: OffsetDateTime,
        finished_at: OffsetDateTime,
        error_message: &str,
    ) -> MetadataResult<Vec<JobExecutionRow>>;

    /// Delete finished executions started before `older_than`.
    async fn prune_job_executions(&self, older_than: OffsetDateTime) -> MetadataResult<u64>;
}
