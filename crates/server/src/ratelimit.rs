//! Cooldown-based rate limiting for administrative jobs.
//!
//! A job may run again once its latest `running` or `success` execution
//! started at least one cooldown ago. Failed runs do not block a retry.
//!
//! The limiter is fail-closed: if the execution log cannot be read, the job
//! is refused with [`ApiError::RateLimitUnverifiable`].

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use custodian_core::job::evaluate_cooldown;
use custodian_core::{Clock, CooldownDecision};
use custodian_metadata::MetadataStore;
use std::sync::Arc;
use time::Duration;

/// Decides whether a named job may start now.
#[derive(Clone)]
pub struct RateLimiter {
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            metadata,
            clock,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Evaluate the cooldown for `job_id`.
    pub async fn check(&self, job_id: &str) -> ApiResult<CooldownDecision> {
        let latest = match self.metadata.latest_blocking_execution(job_id).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Rate limit lookup failed, refusing");
                return Err(ApiError::RateLimitUnverifiable(format!(
                    "execution history for {job_id} is unavailable"
                )));
            }
        };

        Ok(evaluate_cooldown(
            latest.map(|row| row.started_at),
            self.cooldown,
            self.clock.now_utc(),
        ))
    }

    /// Like [`check`](Self::check) but turns a blocked decision into
    /// [`ApiError::RateLimited`].
    pub async fn require(&self, job_id: &str) -> ApiResult<()> {
        match self.check(job_id).await? {
            CooldownDecision::Allowed => Ok(()),
            CooldownDecision::Blocked { next_allowed_at } => {
                metrics::RATE_LIMITED.with_label_values(&[job_id]).inc();
                tracing::warn!(
                    job_id = %job_id,
                    next_allowed_at = %next_allowed_at,
                    "Job refused by cooldown"
                );
                Err(ApiError::RateLimited {
                    job_id: job_id.to_string(),
                    next_allowed_at,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_core::{FixedClock, JobStatus};
    use custodian_metadata::SqliteStore;
    use custodian_metadata::models::JobExecutionRow;
    use custodian_metadata::repos::{JobExecutionRepo, JobFinish};
    use time::macros::datetime;

    async fn setup() -> (tempfile::TempDir, Arc<SqliteStore>, Arc<FixedClock>, RateLimiter) {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );
        let clock = Arc::new(FixedClock::new(datetime!(2024-06-01 12:00 UTC)));
        let limiter = RateLimiter::new(store.clone(), clock.clone(), Duration::minutes(10));
        (temp, store, clock, limiter)
    }

    #[tokio::test]
    async fn test_allowed_without_history() {
        let (_temp, _store, _clock, limiter) = setup().await;
        assert!(limiter.check("job").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_running_blocks_until_cooldown_elapses() {
        let (_temp, store, clock, limiter) = setup().await;
        let started = clock.now_utc();
        store
            .start_job_execution(&JobExecutionRow::running("job", "manual_admin", "files", started))
            .await
            .unwrap();

        let decision = limiter.check("job").await.unwrap();
        assert_eq!(
            decision.next_allowed_at(),
            Some(started + Duration::minutes(10))
        );
        assert!(matches!(
            limiter.require("job").await,
            Err(ApiError::RateLimited { .. })
        ));

        clock.advance(Duration::minutes(10));
        assert!(limiter.check("job").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_block() {
        let (_temp, store, clock, limiter) = setup().await;
        let row = JobExecutionRow::running("job", "manual_admin", "files", clock.now_utc());
        store.start_job_execution(&row).await.unwrap();
        store
            .finish_job_execution(
                row.execution_id,
                &JobFinish {
                    status: JobStatus::Failed,
                    finished_at: clock.now_utc(),
                    duration_ms: 0,
                    result_summary: None,
                    error_message: Some("boom"),
                },
            )
            .await
            .unwrap();

        assert!(limiter.check("job").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_fail_closed() {
        let (_temp, store, _clock, limiter) = setup().await;
        sqlx::query("DROP TABLE admin_job_executions")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            limiter.check("job").await,
            Err(ApiError::RateLimitUnverifiable(_))
        ));
    }
}
