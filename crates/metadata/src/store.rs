//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    AuditRepo, CleanupRepo, JobExecutionRepo, ProjectRepo, ReconcileRepo, SchemaProbe,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    AuditRepo + JobExecutionRepo + ReconcileRepo + CleanupRepo + ProjectRepo + SchemaProbe + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Clamp a database count to `u64`.
pub(crate) fn count_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Milliseconds between two instants, never negative.
pub(crate) fn duration_ms(started_at: OffsetDateTime, finished_at: OffsetDateTime) -> i64 {
    let ms = (finished_at - started_at).whole_milliseconds();
    i64::try_from(ms.max(0)).unwrap_or(i64::MAX)
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serialises writers; transactions never interleave.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only and SQLite has no row-level locks. \
             Concurrent reconciliation and cleanup runs are serialised rather than partitioned. \
             Use PostgreSQL for multi-instance deployments."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Databases created before ghost tracking lack input_files.storage_exists.
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='input_files')",
        )
        .fetch_one(&self.pool)
        .await?;

        if table_exists {
            let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
                sqlx::query_as("PRAGMA table_info(input_files)")
                    .fetch_all(&self.pool)
                    .await?;

            let has_storage_exists = columns
                .iter()
                .any(|(_, name, _, _, _, _)| name == "storage_exists");

            if !has_storage_exists {
                sqlx::query(
                    "ALTER TABLE input_files ADD COLUMN storage_exists INTEGER NOT NULL DEFAULT 1",
                )
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::audit::AuditQuery;
    use crate::repos::cleanup::{CleanupSummary, PurgeRequest, PurgeTarget};
    use crate::repos::jobs::{JobFinish, JobKpis};
    use crate::repos::projects::{HardDeleteOutcome, LifecycleOutcome};
    use crate::repos::reconcile::{
        InvalidationBatch, InvalidationSummary, ProjectCount, TableCount, TableStats, TrackedTable,
    };
    use crate::repos::schema::SchemaObject;
    use custodian_core::lifecycle::{self, AdminStatus, OperationalState};
    use custodian_core::{JobStatus, StorageState};
    use sqlx::{Executor, SqliteConnection};
    use uuid::Uuid;

    async fn insert_audit_event<'e, E>(executor: E, event: &AuditEventRow) -> MetadataResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO audit_events (event_id, project_id, actor_id, action_type, details, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id)
        .bind(event.project_id)
        .bind(&event.actor_id)
        .bind(&event.action_type)
        .bind(&event.details)
        .bind(&event.metadata_json)
        .bind(event.created_at)
        .execute(executor)
        .await
        .map_err(MetadataError::audit_write)?;
        Ok(())
    }

    async fn fetch_project(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> MetadataResult<ProjectRow> {
        sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("project {id}")))
    }

    /// Close a `running` execution as `success` inside the caller's transaction.
    async fn mark_success(
        conn: &mut SqliteConnection,
        execution_id: Uuid,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
        summary: &impl serde::Serialize,
    ) -> MetadataResult<()> {
        let summary_json = serde_json::to_string(summary)?;
        let finished = sqlx::query(
            r#"
            UPDATE admin_job_executions
            SET status = ?, finished_at = ?, duration_ms = ?, result_summary = ?
            WHERE execution_id = ? AND status = 'running'
            "#,
        )
        .bind(JobStatus::Success.as_str())
        .bind(finished_at)
        .bind(duration_ms(started_at, finished_at))
        .bind(&summary_json)
        .bind(execution_id)
        .execute(conn)
        .await?;

        if finished.rows_affected() != 1 {
            return Err(MetadataError::Constraint(format!(
                "execution {execution_id} is not running"
            )));
        }
        Ok(())
    }

    async fn count_purge<'e, E>(executor: E, target: &PurgeTarget) -> MetadataResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count: i64 = match target {
            PurgeTarget::GhostFiles => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM input_files WHERE is_active = 1 AND storage_exists = 0",
                )
                .fetch_one(executor)
                .await?
            }
            PurgeTarget::SnapshotsBefore { cutoff, .. } => {
                sqlx::query_scalar("SELECT COUNT(*) FROM storage_daily_snapshots WHERE day < ?")
                    .bind(*cutoff)
                    .fetch_one(executor)
                    .await?
            }
        };
        Ok(count_u64(count))
    }

    #[async_trait]
    impl AuditRepo for SqliteStore {
        async fn record_audit_event(&self, event: &AuditEventRow) -> MetadataResult<()> {
            insert_audit_event(&self.pool, event).await
        }

        async fn list_audit_events(
            &self,
            query: &AuditQuery,
        ) -> MetadataResult<Vec<AuditEventRow>> {
            let mut sql = String::from("SELECT * FROM audit_events WHERE 1 = 1");
            if query.project_id.is_some() {
                sql.push_str(" AND project_id = ?");
            }
            if query.action_type.is_some() {
                sql.push_str(" AND action_type = ?");
            }
            sql.push_str(" ORDER BY created_at DESC, event_id DESC LIMIT ? OFFSET ?");

            let mut q = sqlx::query_as::<_, AuditEventRow>(&sql);
            if let Some(project_id) = query.project_id {
                q = q.bind(project_id);
            }
            if let Some(action_type) = &query.action_type {
                q = q.bind(action_type);
            }
            let rows = q
                .bind(i64::from(query.page_size()))
                .bind(i64::from(query.offset))
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl JobExecutionRepo for SqliteStore {
        async fn start_job_execution(&self, execution: &JobExecutionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO admin_job_executions
                    (execution_id, job_id, job_type, module, started_at, finished_at, duration_ms, status, result_summary, error_message)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(execution.execution_id)
            .bind(&execution.job_id)
            .bind(&execution.job_type)
            .bind(&execution.module)
            .bind(execution.started_at)
            .bind(execution.finished_at)
            .bind(execution.duration_ms)
            .bind(&execution.status)
            .bind(&execution.result_summary)
            .bind(&execution.error_message)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn finish_job_execution(
            &self,
            execution_id: Uuid,
            finish: &JobFinish<'_>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE admin_job_executions
                SET status = ?, finished_at = ?, duration_ms = ?, result_summary = ?, error_message = ?
                WHERE execution_id = ? AND status = 'running'
                "#,
            )
            .bind(finish.status.as_str())
            .bind(finish.finished_at)
            .bind(finish.duration_ms)
            .bind(finish.result_summary)
            .bind(finish.error_message)
            .bind(execution_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return match self.get_job_execution(execution_id).await? {
                    Some(existing) => Err(MetadataError::Constraint(format!(
                        "execution {execution_id} already finished with status {}",
                        existing.status
                    ))),
                    None => Err(MetadataError::NotFound(format!("execution {execution_id}"))),
                };
            }
            Ok(())
        }

        async fn get_job_execution(
            &self,
            execution_id: Uuid,
        ) -> MetadataResult<Option<JobExecutionRow>> {
            let row = sqlx::query_as::<_, JobExecutionRow>(
                "SELECT * FROM admin_job_executions WHERE execution_id = ?",
            )
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn latest_blocking_execution(
            &self,
            job_id: &str,
        ) -> MetadataResult<Option<JobExecutionRow>> {
            let row = sqlx::query_as::<_, JobExecutionRow>(
                r#"
                SELECT * FROM admin_job_executions
                WHERE job_id = ? AND status IN ('success', 'running')
                ORDER BY started_at DESC
                LIMIT 1
                "#,
            )
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn latest_job_execution(
            &self,
            job_id: &str,
        ) -> MetadataResult<Option<JobExecutionRow>> {
            let row = sqlx::query_as::<_, JobExecutionRow>(
                "SELECT * FROM admin_job_executions WHERE job_id = ? ORDER BY started_at DESC LIMIT 1",
            )
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_job_executions(
            &self,
            since: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<JobExecutionRow>> {
            let rows = sqlx::query_as::<_, JobExecutionRow>(
                "SELECT * FROM admin_job_executions WHERE started_at >= ? ORDER BY started_at DESC LIMIT ?",
            )
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_failed_job_executions(
            &self,
            since: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<JobExecutionRow>> {
            let rows = sqlx::query_as::<_, JobExecutionRow>(
                r#"
                SELECT * FROM admin_job_executions
                WHERE status = 'failed' AND started_at >= ? AND error_message IS NOT NULL
                ORDER BY started_at DESC
                LIMIT ?
                "#,
            )
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn job_execution_kpis(&self, since: OffsetDateTime) -> MetadataResult<JobKpis> {
            let (failed, success, running, total): (i64, i64, i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN status = 'failed' AND started_at >= ? THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'success' AND started_at >= ? THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN started_at >= ? THEN 1 ELSE 0 END), 0)
                FROM admin_job_executions
                "#,
            )
            .bind(since)
            .bind(since)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

            Ok(JobKpis {
                failed: count_u64(failed),
                success: count_u64(success),
                running: count_u64(running),
                total: count_u64(total),
            })
        }

        async fn fail_running_job_executions(
            &self,
            started_before: OffsetDateTime,
            finished_at: OffsetDateTime,
            error_message: &str,
        ) -> MetadataResult<Vec<JobExecutionRow>> {
            let mut tx = self.pool.begin().await?;

            let running = sqlx::query_as::<_, JobExecutionRow>(
                "SELECT * FROM admin_job_executions WHERE status = 'running' AND started_at <= ?",
            )
            .bind(started_before)
            .fetch_all(&mut *tx)
            .await?;

            for execution in &running {
                sqlx::query(
                    r#"
                    UPDATE admin_job_executions
                    SET status = ?, finished_at = ?, duration_ms = ?, error_message = ?
                    WHERE execution_id = ? AND status = 'running'
                    "#,
                )
                .bind(JobStatus::Failed.as_str())
                .bind(finished_at)
                .bind(duration_ms(execution.started_at, finished_at))
                .bind(error_message)
                .bind(execution.execution_id)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(running)
        }

        async fn prune_job_executions(&self, older_than: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query(
                "DELETE FROM admin_job_executions WHERE started_at < ? AND status IN ('success', 'failed')",
            )
            .bind(older_than)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    fn scoped(sql: &str, project_id: Option<Uuid>) -> String {
        match project_id {
            Some(_) => format!("{sql} AND project_id = ?"),
            None => sql.to_string(),
        }
    }

    #[async_trait]
    impl ReconcileRepo for SqliteStore {
        async fn create_tracked_resource(
            &self,
            table: TrackedTable,
            resource: &TrackedResourceRow,
        ) -> MetadataResult<()> {
            let sql = format!(
                r#"
                INSERT INTO {} (id, project_id, storage_state, storage_exists, is_active, is_archived, created_at, invalidated_at, invalidation_reason)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                table.as_str()
            );
            sqlx::query(&sql)
                .bind(resource.id)
                .bind(resource.project_id)
                .bind(&resource.storage_state)
                .bind(resource.storage_exists)
                .bind(resource.is_active)
                .bind(resource.is_archived)
                .bind(resource.created_at)
                .bind(resource.invalidated_at)
                .bind(&resource.invalidation_reason)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_tracked_resource(
            &self,
            table: TrackedTable,
            id: Uuid,
        ) -> MetadataResult<Option<TrackedResourceRow>> {
            let sql = format!("SELECT * FROM {} WHERE id = ?", table.as_str());
            let row = sqlx::query_as::<_, TrackedResourceRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn set_storage_state(
            &self,
            table: TrackedTable,
            id: Uuid,
            next: StorageState,
            at: OffsetDateTime,
        ) -> MetadataResult<()> {
            if next == StorageState::Invalidated {
                return Err(MetadataError::NotAllowed(
                    "resources are invalidated only by reconciliation".to_string(),
                ));
            }

            let mut tx = self.pool.begin().await?;
            let select = format!("SELECT storage_state FROM {} WHERE id = ?", table.as_str());
            let current: String = sqlx::query_scalar(&select)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("{} {id}", table.as_str())))?;
            let current = StorageState::parse(&current)?;

            if !current.can_transition_to(next) {
                return Err(MetadataError::InvalidStateTransition {
                    from: current.as_str().to_string(),
                    to: next.as_str().to_string(),
                    allowed: StorageState::ALL
                        .iter()
                        .filter(|s| **s != current && current.can_transition_to(**s))
                        .map(|s| s.as_str().to_string())
                        .collect(),
                });
            }

            let update = format!(
                "UPDATE {} SET storage_state = ?, storage_exists = CASE WHEN ? THEN 1 ELSE storage_exists END WHERE id = ? AND storage_state = ?",
                table.as_str()
            );
            sqlx::query(&update)
                .bind(next.as_str())
                .bind(next == StorageState::Present)
                .bind(id)
                .bind(current.as_str())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            tracing::debug!(table = table.as_str(), id = %id, from = %current, to = %next, at = %at, "Storage state updated");
            Ok(())
        }

        async fn count_reconcile_eligible(
            &self,
            table: TrackedTable,
            project_id: Option<Uuid>,
        ) -> MetadataResult<u64> {
            let sql = scoped(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE storage_state = ? AND is_active = 1 AND is_archived = 0",
                    table.as_str()
                ),
                project_id,
            );
            let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(StorageState::Missing.as_str());
            if let Some(project_id) = project_id {
                q = q.bind(project_id);
            }
            let count = q.fetch_one(&self.pool).await?;
            Ok(count_u64(count))
        }

        async fn count_reconcile_eligible_by_project(&self) -> MetadataResult<Vec<ProjectCount>> {
            let rows: Vec<(Uuid, i64)> = sqlx::query_as(
                r#"
                SELECT project_id, COUNT(*) AS eligible
                FROM (
                    SELECT project_id FROM input_files
                    WHERE storage_state = ? AND is_active = 1 AND is_archived = 0
                    UNION ALL
                    SELECT project_id FROM product_files
                    WHERE storage_state = ? AND is_active = 1 AND is_archived = 0
                ) AS missing
                GROUP BY project_id
                ORDER BY eligible DESC, project_id
                "#,
            )
            .bind(StorageState::Missing.as_str())
            .bind(StorageState::Missing.as_str())
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .into_iter()
                .map(|(project_id, count)| ProjectCount {
                    project_id,
                    count: count_u64(count),
                })
                .collect())
        }

        async fn invalidate_missing(
            &self,
            batch: &InvalidationBatch,
            audit: &AuditEventRow,
        ) -> MetadataResult<InvalidationSummary> {
            let mut tx = self.pool.begin().await?;

            insert_audit_event(&mut *tx, audit).await?;

            let mut counts = Vec::with_capacity(TrackedTable::ALL.len());
            for table in TrackedTable::ALL {
                let select = scoped(
                    &format!(
                        "SELECT id FROM {} WHERE storage_state = ? AND is_active = 1 AND is_archived = 0",
                        table.as_str()
                    ),
                    batch.project_id,
                );
                let sql = format!(
                    r#"
                    UPDATE {table}
                    SET storage_state = ?, invalidated_at = ?, invalidation_reason = ?
                    WHERE id IN ({select} ORDER BY created_at, id LIMIT ?)
                    "#,
                    table = table.as_str(),
                );

                let mut q = sqlx::query(&sql)
                    .bind(StorageState::Invalidated.as_str())
                    .bind(batch.invalidated_at)
                    .bind(&batch.reason)
                    .bind(StorageState::Missing.as_str());
                if let Some(project_id) = batch.project_id {
                    q = q.bind(project_id);
                }
                let result = q.bind(i64::from(batch.limit)).execute(&mut *tx).await?;

                counts.push(TableCount {
                    table,
                    count: result.rows_affected(),
                });
            }

            let summary = InvalidationSummary::new(batch, &counts);
            mark_success(
                &mut *tx,
                batch.execution_id,
                batch.started_at,
                batch.invalidated_at,
                &summary,
            )
            .await?;

            tx.commit().await?;
            Ok(summary)
        }

        async fn reconcile_stats(
            &self,
            project_id: Option<Uuid>,
        ) -> MetadataResult<Vec<TableStats>> {
            let mut stats = Vec::with_capacity(TrackedTable::ALL.len());
            for table in TrackedTable::ALL {
                let where_clause = if project_id.is_some() {
                    " WHERE project_id = ?"
                } else {
                    ""
                };
                let sql = format!(
                    r#"
                    SELECT
                        COALESCE(SUM(CASE WHEN storage_state = ? AND is_active = 1 AND is_archived = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN storage_state = ? THEN 1 ELSE 0 END), 0)
                    FROM {}{where_clause}
                    "#,
                    table.as_str()
                );
                let mut q = sqlx::query_as::<_, (i64, i64)>(&sql)
                    .bind(StorageState::Missing.as_str())
                    .bind(StorageState::Invalidated.as_str());
                if let Some(project_id) = project_id {
                    q = q.bind(project_id);
                }
                let (missing_active, invalidated) = q.fetch_one(&self.pool).await?;
                stats.push(TableStats {
                    table,
                    missing_active: count_u64(missing_active),
                    invalidated: count_u64(invalidated),
                });
            }
            Ok(stats)
        }
    }

    #[async_trait]
    impl CleanupRepo for SqliteStore {
        async fn count_purge_eligible(&self, target: &PurgeTarget) -> MetadataResult<u64> {
            count_purge(&self.pool, target).await
        }

        async fn purge(
            &self,
            request: &PurgeRequest,
            audit: &AuditEventRow,
        ) -> MetadataResult<CleanupSummary> {
            let mut tx = self.pool.begin().await?;

            insert_audit_event(&mut *tx, audit).await?;

            let limit = i64::from(request.limit);
            let deleted = match request.target {
                PurgeTarget::GhostFiles => sqlx::query(
                    r#"
                    DELETE FROM input_files
                    WHERE id IN (
                        SELECT id FROM input_files
                        WHERE is_active = 1 AND storage_exists = 0
                        ORDER BY created_at, id
                        LIMIT ?
                    )
                    "#,
                )
                .bind(limit)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
                PurgeTarget::SnapshotsBefore { cutoff, .. } => sqlx::query(
                    r#"
                    DELETE FROM storage_daily_snapshots
                    WHERE day IN (
                        SELECT day FROM storage_daily_snapshots
                        WHERE day < ?
                        ORDER BY day
                        LIMIT ?
                    )
                    "#,
                )
                .bind(cutoff)
                .bind(limit)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
            };

            let remaining = count_purge(&mut *tx, &request.target).await?;
            let summary = CleanupSummary::new(request, deleted, remaining);
            mark_success(
                &mut *tx,
                request.execution_id,
                request.started_at,
                request.finished_at,
                &summary,
            )
            .await?;

            tx.commit().await?;
            Ok(summary)
        }

        async fn insert_storage_snapshot(
            &self,
            snapshot: &StorageSnapshotRow,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO storage_daily_snapshots (day, total_bytes, object_count, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(day) DO UPDATE SET
                    total_bytes = excluded.total_bytes,
                    object_count = excluded.object_count
                "#,
            )
            .bind(snapshot.day)
            .bind(snapshot.total_bytes)
            .bind(snapshot.object_count)
            .bind(snapshot.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectRepo for SqliteStore {
        async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO projects (id, owner_id, slug, name, operational_state, admin_status, created_at, updated_at, ready_at, archived_at, closed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(project.id)
            .bind(project.owner_id)
            .bind(&project.slug)
            .bind(&project.name)
            .bind(&project.operational_state)
            .bind(&project.admin_status)
            .bind(project.created_at)
            .bind(project.updated_at)
            .bind(project.ready_at)
            .bind(project.archived_at)
            .bind(project.closed_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(MetadataError::AlreadyExists(format!(
                        "project slug '{}' already exists for this owner",
                        project.slug
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_project(&self, id: Uuid) -> MetadataResult<Option<ProjectRow>> {
            let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn transition_project(
            &self,
            id: Uuid,
            target: OperationalState,
            actor_id: Option<&str>,
            at: OffsetDateTime,
        ) -> MetadataResult<LifecycleOutcome> {
            let mut tx = self.pool.begin().await?;

            let project = fetch_project(&mut *tx, id).await?;
            let from = project.operational_state()?;
            let plan = lifecycle::plan_transition(from, target)?;

            let audit_event = AuditEventRow::new(
                Some(id),
                actor_id,
                "project_state_transition",
                format!("{from} -> {target}"),
                serde_json::json!({
                    "from": from.as_str(),
                    "to": target.as_str(),
                    "noop": plan.is_noop(),
                }),
                at,
            )?;
            insert_audit_event(&mut *tx, &audit_event).await?;

            if !plan.is_noop() {
                let ready_at = if target == OperationalState::Ready {
                    Some(at)
                } else {
                    project.ready_at
                };
                let archived_at = if target == OperationalState::Archived {
                    Some(at)
                } else {
                    project.archived_at
                };

                let result = sqlx::query(
                    r#"
                    UPDATE projects
                    SET operational_state = ?, ready_at = ?, archived_at = ?, updated_at = ?
                    WHERE id = ? AND operational_state = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(ready_at)
                .bind(archived_at)
                .bind(at)
                .bind(id)
                .bind(from.as_str())
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(MetadataError::NotFound(format!("project {id}")));
                }
            }

            let project = fetch_project(&mut *tx, id).await?;
            tx.commit().await?;

            Ok(LifecycleOutcome {
                project,
                noop: plan.is_noop(),
                audit_event,
            })
        }

        async fn close_project(
            &self,
            id: Uuid,
            reason: &str,
            actor_id: Option<&str>,
            at: OffsetDateTime,
        ) -> MetadataResult<LifecycleOutcome> {
            let mut tx = self.pool.begin().await?;

            let project = fetch_project(&mut *tx, id).await?;
            let state = project.operational_state()?;
            let status = project.admin_status()?;
            let plan = lifecycle::plan_close(state, status)?;

            let audit_event = AuditEventRow::new(
                Some(id),
                actor_id,
                "project_close",
                reason,
                serde_json::json!({
                    "reason": reason,
                    "operational_state": state.as_str(),
                    "previous_admin_status": status.as_str(),
                    "noop": plan.is_noop(),
                }),
                at,
            )?;
            insert_audit_event(&mut *tx, &audit_event).await?;

            if !plan.is_noop() {
                let result = sqlx::query(
                    r#"
                    UPDATE projects
                    SET admin_status = ?, closed_at = ?, updated_at = ?
                    WHERE id = ? AND admin_status = ?
                    "#,
                )
                .bind(AdminStatus::Closed.as_str())
                .bind(at)
                .bind(at)
                .bind(id)
                .bind(AdminStatus::InProcess.as_str())
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(MetadataError::NotFound(format!("project {id}")));
                }
            }

            let project = fetch_project(&mut *tx, id).await?;
            tx.commit().await?;

            Ok(LifecycleOutcome {
                project,
                noop: plan.is_noop(),
                audit_event,
            })
        }

        async fn hard_delete_project(
            &self,
            id: Uuid,
            actor_id: Option<&str>,
            at: OffsetDateTime,
        ) -> MetadataResult<HardDeleteOutcome> {
            let mut tx = self.pool.begin().await?;

            let project = fetch_project(&mut *tx, id).await?;
            lifecycle::check_hard_delete(project.admin_status()?)?;

            let audit_event = AuditEventRow::new(
                Some(id),
                actor_id,
                "project_hard_delete",
                format!("hard delete of project '{}'", project.slug),
                serde_json::json!({
                    "operation": "hard_delete",
                    "snapshot": project.audit_snapshot(),
                }),
                at,
            )?;
            // Nothing is deleted unless this insert succeeds.
            insert_audit_event(&mut *tx, &audit_event).await?;

            let result = sqlx::query("DELETE FROM projects WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            match result.rows_affected() {
                0 => return Err(MetadataError::NotFound(format!("project {id}"))),
                1 => {}
                n => {
                    return Err(MetadataError::Internal(format!(
                        "hard delete of project {id} matched {n} rows"
                    )));
                }
            }

            tx.commit().await?;
            Ok(HardDeleteOutcome {
                project,
                audit_event,
            })
        }
    }

    #[async_trait]
    impl SchemaProbe for SqliteStore {
        async fn object_exists(&self, object: &SchemaObject) -> MetadataResult<bool> {
            let exists = match object {
                SchemaObject::Table(name) => {
                    sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                    )
                    .bind(*name)
                    .fetch_one(&self.pool)
                    .await?
                }
                SchemaObject::Column { table, column } => {
                    sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?) WHERE name = ?)",
                    )
                    .bind(*table)
                    .bind(*column)
                    .fetch_one(&self.pool)
                    .await?
                }
                // SQLite has no stored functions.
                SchemaObject::Function(_) => false,
            };
            Ok(exists)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Projects
CREATE TABLE IF NOT EXISTS projects (
    id BLOB PRIMARY KEY,
    owner_id BLOB NOT NULL,
    slug TEXT NOT NULL,
    name TEXT NOT NULL,
    operational_state TEXT NOT NULL DEFAULT 'created'
        CHECK (operational_state IN ('created', 'uploading', 'processing', 'ready', 'error', 'archived')),
    admin_status TEXT NOT NULL DEFAULT 'in_process'
        CHECK (admin_status IN ('in_process', 'closed', 'retention_grace', 'deleted_by_policy')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    ready_at TEXT,
    archived_at TEXT,
    closed_at TEXT,
    UNIQUE (owner_id, slug)
);
CREATE INDEX IF NOT EXISTS idx_projects_admin_status ON projects(admin_status);

-- Tracked resources
CREATE TABLE IF NOT EXISTS input_files (
    id BLOB PRIMARY KEY,
    project_id BLOB NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    storage_state TEXT NOT NULL DEFAULT 'present'
        CHECK (storage_state IN ('present', 'missing', 'invalidated')),
    storage_exists INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    invalidated_at TEXT,
    invalidation_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_input_files_state ON input_files(storage_state, created_at, id);
CREATE INDEX IF NOT EXISTS idx_input_files_project ON input_files(project_id);
CREATE INDEX IF NOT EXISTS idx_input_files_ghost ON input_files(created_at, id) WHERE storage_exists = 0;

CREATE TABLE IF NOT EXISTS product_files (
    id BLOB PRIMARY KEY,
    project_id BLOB NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    storage_state TEXT NOT NULL DEFAULT 'present'
        CHECK (storage_state IN ('present', 'missing', 'invalidated')),
    storage_exists INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    invalidated_at TEXT,
    invalidation_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_product_files_state ON product_files(storage_state, created_at, id);
CREATE INDEX IF NOT EXISTS idx_product_files_project ON product_files(project_id);

-- Invalidated is terminal
CREATE TRIGGER IF NOT EXISTS input_files_invalidated_terminal
BEFORE UPDATE OF storage_state ON input_files
WHEN OLD.storage_state = 'invalidated' AND NEW.storage_state <> 'invalidated'
BEGIN
    SELECT RAISE(ABORT, 'invalidated storage_state is terminal');
END;
CREATE TRIGGER IF NOT EXISTS product_files_invalidated_terminal
BEFORE UPDATE OF storage_state ON product_files
WHEN OLD.storage_state = 'invalidated' AND NEW.storage_state <> 'invalidated'
BEGIN
    SELECT RAISE(ABORT, 'invalidated storage_state is terminal');
END;

-- Daily storage snapshots (metadata only)
CREATE TABLE IF NOT EXISTS storage_daily_snapshots (
    day TEXT PRIMARY KEY,
    total_bytes INTEGER NOT NULL DEFAULT 0,
    object_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Administrative job executions
CREATE TABLE IF NOT EXISTS admin_job_executions (
    execution_id BLOB PRIMARY KEY,
    job_id TEXT NOT NULL,
    job_type TEXT NOT NULL,
    module TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    duration_ms INTEGER,
    status TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
    result_summary TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_executions_job_started ON admin_job_executions(job_id, started_at);
CREATE INDEX IF NOT EXISTS idx_job_executions_started ON admin_job_executions(started_at);

-- Audit ledger (append-only)
CREATE TABLE IF NOT EXISTS audit_events (
    event_id BLOB PRIMARY KEY,
    project_id BLOB,
    actor_id TEXT,
    action_type TEXT NOT NULL,
    details TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_project ON audit_events(project_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_events_action ON audit_events(action_type, created_at);
CREATE TRIGGER IF NOT EXISTS audit_events_no_update
BEFORE UPDATE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit_events is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
BEFORE DELETE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit_events is append-only');
END;
"#;
