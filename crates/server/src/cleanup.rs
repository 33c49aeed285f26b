//! Dry-run, confirm, execute workflow for the bulk purge jobs.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::ratelimit::RateLimiter;
use crate::schema::require_objects;
use crate::tracker::JobTracker;
use custodian_core::cleanup::{cutoff_day, estimated_batches};
use custodian_core::config::CleanupConfig;
use custodian_core::{CleanupJob, CooldownDecision, LogOnce};
use custodian_metadata::MetadataStore;
use custodian_metadata::models::AuditEventRow;
use custodian_metadata::repos::{CleanupSummary, PurgeRequest, PurgeTarget, SchemaObject};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

const GHOST_OBJECTS: [SchemaObject; 3] = [
    SchemaObject::Table("input_files"),
    SchemaObject::Column {
        table: "input_files",
        column: "storage_exists",
    },
    SchemaObject::Column {
        table: "input_files",
        column: "is_active",
    },
];

const SNAPSHOT_OBJECTS: [SchemaObject; 2] = [
    SchemaObject::Table("storage_daily_snapshots"),
    SchemaObject::Column {
        table: "storage_daily_snapshots",
        column: "day",
    },
];

fn required_objects(job: CleanupJob) -> &'static [SchemaObject] {
    match job {
        CleanupJob::GhostFiles => &GHOST_OBJECTS,
        CleanupJob::StorageSnapshots => &SNAPSHOT_OBJECTS,
    }
}

/// What an execute call would do right now.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupPreview {
    pub job_id: &'static str,
    pub eligible_count: u64,
    pub estimated_batches: u64,
    pub max_per_run: u32,
    pub rate_limit_window_secs: u64,
    pub can_execute: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_allowed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

/// Result of a committed purge.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub job_id: &'static str,
    pub execution_id: Uuid,
    #[serde(flatten)]
    pub summary: CleanupSummary,
}

pub struct CleanupRunner {
    metadata: Arc<dyn MetadataStore>,
    tracker: JobTracker,
    rate_limiter: RateLimiter,
    log_once: Arc<LogOnce>,
    config: CleanupConfig,
}

impl CleanupRunner {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        tracker: JobTracker,
        rate_limiter: RateLimiter,
        log_once: Arc<LogOnce>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            metadata,
            tracker,
            rate_limiter,
            log_once,
            config,
        }
    }

    fn target(&self, job: CleanupJob, retention_days: Option<u32>) -> ApiResult<PurgeTarget> {
        match job {
            CleanupJob::GhostFiles => Ok(PurgeTarget::GhostFiles),
            CleanupJob::StorageSnapshots => {
                let retention_days = self.config.retention_policy().resolve(retention_days)?;
                let cutoff = cutoff_day(self.tracker.now().date(), retention_days)?;
                Ok(PurgeTarget::SnapshotsBefore {
                    cutoff,
                    retention_days,
                })
            }
        }
    }

    /// Count eligible rows and evaluate the cooldown. Never mutates.
    pub async fn dry_run(
        &self,
        job: CleanupJob,
        retention_days: Option<u32>,
    ) -> ApiResult<CleanupPreview> {
        let target = self.target(job, retention_days)?;
        require_objects(self.metadata.as_ref(), &self.log_once, required_objects(job)).await?;

        let eligible_count = self.metadata.count_purge_eligible(&target).await?;
        let decision = self.rate_limiter.check(job.job_id()).await?;

        let (cutoff_day, retention_days) = match target {
            PurgeTarget::GhostFiles => (None, None),
            PurgeTarget::SnapshotsBefore {
                cutoff,
                retention_days,
            } => (Some(cutoff.to_string()), Some(retention_days)),
        };

        Ok(CleanupPreview {
            job_id: job.job_id(),
            eligible_count,
            estimated_batches: estimated_batches(
                eligible_count,
                u64::from(self.config.max_records_per_run),
            ),
            max_per_run: self.config.max_records_per_run,
            rate_limit_window_secs: self.config.cooldown_secs,
            can_execute: matches!(decision, CooldownDecision::Allowed),
            next_allowed_at: decision.next_allowed_at(),
            cutoff_day,
            retention_days,
        })
    }

    /// Delete one bounded batch.
    ///
    /// Order of checks: confirmation phrase and retention window (no database
    /// access), cooldown, schema, eligible rows. Only then is an execution
    /// row opened.
    pub async fn execute(
        &self,
        job: CleanupJob,
        confirm_text: &str,
        retention_days: Option<u32>,
        actor_id: Option<&str>,
    ) -> ApiResult<CleanupReport> {
        job.check_confirmation(confirm_text)?;
        let target = self.target(job, retention_days)?;

        self.rate_limiter.require(job.job_id()).await?;
        require_objects(self.metadata.as_ref(), &self.log_once, required_objects(job)).await?;

        let eligible_before = self.metadata.count_purge_eligible(&target).await?;
        if eligible_before == 0 {
            return Err(ApiError::Validation(format!(
                "nothing eligible for {}",
                job.job_id()
            )));
        }

        let handle = self.tracker.start(job.job_id(), job.module()).await?;
        let limit = self.config.max_records_per_run;

        let audit = AuditEventRow::new(
            None,
            actor_id,
            job.audit_action(),
            format!("purge up to {limit} rows ({eligible_before} eligible)"),
            serde_json::json!({
                "job_id": job.job_id(),
                "execution_id": handle.execution_id,
                "limit": limit,
                "eligible_before": eligible_before,
            }),
            handle.started_at,
        );
        let audit = match audit {
            Ok(audit) => audit,
            Err(e) => {
                let e = ApiError::from(e);
                self.tracker.finish_failed(&handle, &e).await;
                return Err(e);
            }
        };

        let finished_at = self.tracker.now();
        let request = PurgeRequest {
            target,
            limit,
            execution_id: handle.execution_id,
            started_at: handle.started_at,
            finished_at,
            eligible_before,
        };

        match self.metadata.purge(&request, &audit).await {
            Ok(summary) => {
                self.tracker.record_committed_success(&handle, finished_at);
                metrics::CLEANUP_DELETED
                    .with_label_values(&[job.job_id()])
                    .inc_by(summary.deleted_count);
                tracing::info!(
                    job_id = job.job_id(),
                    execution_id = %handle.execution_id,
                    deleted = summary.deleted_count,
                    remaining = summary.remaining_after,
                    "Cleanup batch committed"
                );
                Ok(CleanupReport {
                    job_id: job.job_id(),
                    execution_id: handle.execution_id,
                    summary,
                })
            }
            Err(e) => {
                let e = ApiError::from(e);
                metrics::record_audit_failure(&e);
                self.tracker.finish_failed(&handle, &e).await;
                Err(e)
            }
        }
    }
}
