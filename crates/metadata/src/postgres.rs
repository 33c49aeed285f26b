//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    AuditQuery, AuditRepo, CleanupRepo, CleanupSummary, HardDeleteOutcome, InvalidationBatch,
    InvalidationSummary,
    JobExecutionRepo, JobFinish, JobKpis, LifecycleOutcome, ProjectCount, ProjectRepo,
    PurgeRequest, PurgeTarget, ReconcileRepo, SchemaObject, SchemaProbe, TableCount, TableStats,
    TrackedTable,
};
use crate::store::{MetadataStore, count_u64, duration_ms};
use async_trait::async_trait;
use custodian_core::config::{MetadataConfig, PgSslMode};
use custodian_core::lifecycle::{self, AdminStatus, OperationalState};
use custodian_core::{JobStatus, StorageState};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Executor, PgConnection, Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Open from a `postgres` metadata section. `url` wins over the
    /// individual connection parameters.
    pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Self> {
        let MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } = config
        else {
            return Err(MetadataError::Config(
                "metadata section is not a postgres configuration".to_string(),
            ));
        };

        match (url, host, database) {
            (Some(url), _, _) => {
                Self::from_url(url, *max_connections, *statement_timeout_ms).await
            }
            (None, Some(host), Some(database)) => {
                Self::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await
            }
            _ => Err(MetadataError::Config(
                "postgres needs either `url` or `host` and `database`".to_string(),
            )),
        }
    }

    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        tracing::info!("Connecting to PostgreSQL from URL");
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable instead of
    /// being embedded in a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        // Bounds how long a bulk purge or invalidation may hold row locks.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_audit_event<'e, E>(executor: E, event: &AuditEventRow) -> MetadataResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_events (event_id, project_id, actor_id, action_type, details, metadata_json, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
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

/// Load a project and hold its row lock until the transaction ends.
async fn lock_project(conn: &mut PgConnection, id: Uuid) -> MetadataResult<ProjectRow> {
    sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| MetadataError::NotFound(format!("project {id}")))
}

/// Close a `running` execution as `success` inside the caller's transaction.
async fn mark_success(
    conn: &mut PgConnection,
    execution_id: Uuid,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    summary: &impl serde::Serialize,
) -> MetadataResult<()> {
    let summary_json = serde_json::to_string(summary)?;
    let finished = sqlx::query(
        r#"
        UPDATE admin_job_executions
        SET status = $1, finished_at = $2, duration_ms = $3, result_summary = $4
        WHERE execution_id = $5 AND status = 'running'
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
    E: Executor<'e, Database = Postgres>,
{
    let count: i64 = match target {
        PurgeTarget::GhostFiles => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM input_files WHERE is_active AND NOT storage_exists",
            )
            .fetch_one(executor)
            .await?
        }
        PurgeTarget::SnapshotsBefore { cutoff, .. } => {
            sqlx::query_scalar("SELECT COUNT(*) FROM storage_daily_snapshots WHERE day < $1")
                .bind(*cutoff)
                .fetch_one(executor)
                .await?
        }
    };
    Ok(count_u64(count))
}

#[async_trait]
impl AuditRepo for PostgresStore {
    async fn record_audit_event(&self, event: &AuditEventRow) -> MetadataResult<()> {
        insert_audit_event(&self.pool, event).await
    }

    async fn list_audit_events(&self, query: &AuditQuery) -> MetadataResult<Vec<AuditEventRow>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT * FROM audit_events
            WHERE ($1::uuid IS NULL OR project_id = $1)
              AND ($2::text IS NULL OR action_type = $2)
            ORDER BY created_at DESC, event_id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(query.project_id)
        .bind(&query.action_type)
        .bind(i64::from(query.page_size()))
        .bind(i64::from(query.offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl JobExecutionRepo for PostgresStore {
    async fn start_job_execution(&self, execution: &JobExecutionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_job_executions
                (execution_id, job_id, job_type, module, started_at, finished_at, duration_ms, status, result_summary, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
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
            SET status = $1, finished_at = $2, duration_ms = $3, result_summary = $4, error_message = $5
            WHERE execution_id = $6 AND status = 'running'
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
            "SELECT * FROM admin_job_executions WHERE execution_id = $1",
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
            WHERE job_id = $1 AND status IN ('success', 'running')
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn latest_job_execution(&self, job_id: &str) -> MetadataResult<Option<JobExecutionRow>> {
        let row = sqlx::query_as::<_, JobExecutionRow>(
            "SELECT * FROM admin_job_executions WHERE job_id = $1 ORDER BY started_at DESC LIMIT 1",
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
            "SELECT * FROM admin_job_executions WHERE started_at >= $1 ORDER BY started_at DESC LIMIT $2",
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
            WHERE status = 'failed' AND started_at >= $1 AND error_message IS NOT NULL
            ORDER BY started_at DESC
            LIMIT $2
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
                COUNT(*) FILTER (WHERE status = 'failed' AND started_at >= $1),
                COUNT(*) FILTER (WHERE status = 'success' AND started_at >= $1),
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE started_at >= $1)
            FROM admin_job_executions
            "#,
        )
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
            "SELECT * FROM admin_job_executions WHERE status = 'running' AND started_at <= $1 FOR UPDATE",
        )
        .bind(started_before)
        .fetch_all(&mut *tx)
        .await?;

        for execution in &running {
            sqlx::query(
                r#"
                UPDATE admin_job_executions
                SET status = $1, finished_at = $2, duration_ms = $3, error_message = $4
                WHERE execution_id = $5 AND status = 'running'
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
            "DELETE FROM admin_job_executions WHERE started_at < $1 AND status IN ('success', 'failed')",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReconcileRepo for PostgresStore {
    async fn create_tracked_resource(
        &self,
        table: TrackedTable,
        resource: &TrackedResourceRow,
    ) -> MetadataResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, project_id, storage_state, storage_exists, is_active, is_archived, created_at, invalidated_at, invalidation_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        let sql = format!("SELECT * FROM {} WHERE id = $1", table.as_str());
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
        let select = format!(
            "SELECT storage_state FROM {} WHERE id = $1 FOR UPDATE",
            table.as_str()
        );
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
            "UPDATE {} SET storage_state = $1, storage_exists = (storage_exists OR $2) WHERE id = $3",
            table.as_str()
        );
        sqlx::query(&update)
            .bind(next.as_str())
            .bind(next == StorageState::Present)
            .bind(id)
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
        let sql = format!(
            r#"
            SELECT COUNT(*) FROM {}
            WHERE storage_state = $1 AND is_active AND NOT is_archived
              AND ($2::uuid IS NULL OR project_id = $2)
            "#,
            table.as_str()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(StorageState::Missing.as_str())
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count_u64(count))
    }

    async fn count_reconcile_eligible_by_project(&self) -> MetadataResult<Vec<ProjectCount>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT project_id, COUNT(*) AS eligible
            FROM (
                SELECT project_id FROM input_files
                WHERE storage_state = $1 AND is_active AND NOT is_archived
                UNION ALL
                SELECT project_id FROM product_files
                WHERE storage_state = $1 AND is_active AND NOT is_archived
            ) AS missing
            GROUP BY project_id
            ORDER BY eligible DESC, project_id
            "#,
        )
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
            // Rows locked by a concurrent run are left for that run.
            let sql = format!(
                r#"
                WITH batch AS (
                    SELECT id FROM {table}
                    WHERE storage_state = $1 AND is_active AND NOT is_archived
                      AND ($6::uuid IS NULL OR project_id = $6)
                    ORDER BY created_at, id
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE {table}
                SET storage_state = $3, invalidated_at = $4, invalidation_reason = $5
                WHERE id IN (SELECT id FROM batch) AND storage_state = $1
                "#,
                table = table.as_str(),
            );
            let result = sqlx::query(&sql)
                .bind(StorageState::Missing.as_str())
                .bind(i64::from(batch.limit))
                .bind(StorageState::Invalidated.as_str())
                .bind(batch.invalidated_at)
                .bind(&batch.reason)
                .bind(batch.project_id)
                .execute(&mut *tx)
                .await?;

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

    async fn reconcile_stats(&self, project_id: Option<Uuid>) -> MetadataResult<Vec<TableStats>> {
        let mut stats = Vec::with_capacity(TrackedTable::ALL.len());
        for table in TrackedTable::ALL {
            let sql = format!(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE storage_state = $1 AND is_active AND NOT is_archived),
                    COUNT(*) FILTER (WHERE storage_state = $2)
                FROM {}
                WHERE ($3::uuid IS NULL OR project_id = $3)
                "#,
                table.as_str()
            );
            let (missing_active, invalidated): (i64, i64) = sqlx::query_as(&sql)
                .bind(StorageState::Missing.as_str())
                .bind(StorageState::Invalidated.as_str())
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
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
impl CleanupRepo for PostgresStore {
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
        // Concurrent purges skip each other's locked rows instead of deleting them twice.
        let deleted = match request.target {
            PurgeTarget::GhostFiles => sqlx::query(
                r#"
                WITH batch AS (
                    SELECT id FROM input_files
                    WHERE is_active AND NOT storage_exists
                    ORDER BY created_at, id
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                DELETE FROM input_files
                WHERE id IN (SELECT id FROM batch)
                "#,
            )
            .bind(limit)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            PurgeTarget::SnapshotsBefore { cutoff, .. } => sqlx::query(
                r#"
                WITH batch AS (
                    SELECT day FROM storage_daily_snapshots
                    WHERE day < $1
                    ORDER BY day
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                DELETE FROM storage_daily_snapshots
                WHERE day IN (SELECT day FROM batch)
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

    async fn insert_storage_snapshot(&self, snapshot: &StorageSnapshotRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO storage_daily_snapshots (day, total_bytes, object_count, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (day) DO UPDATE SET
                total_bytes = EXCLUDED.total_bytes,
                object_count = EXCLUDED.object_count
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
impl ProjectRepo for PostgresStore {
    async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, slug, name, operational_state, admin_status, created_at, updated_at, ready_at, archived_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
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

        let project = lock_project(&mut *tx, id).await?;
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

        let project = if plan.is_noop() {
            project
        } else {
            sqlx::query_as::<_, ProjectRow>(
                r#"
                UPDATE projects
                SET operational_state = $1,
                    ready_at = CASE WHEN $1 = 'ready' THEN $2 ELSE ready_at END,
                    archived_at = CASE WHEN $1 = 'archived' THEN $2 ELSE archived_at END,
                    updated_at = $2
                WHERE id = $3
                RETURNING *
                "#,
            )
            .bind(target.as_str())
            .bind(at)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
        };

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

        let project = lock_project(&mut *tx, id).await?;
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

        let project = if plan.is_noop() {
            project
        } else {
            sqlx::query_as::<_, ProjectRow>(
                r#"
                UPDATE projects
                SET admin_status = $1, closed_at = $2, updated_at = $2
                WHERE id = $3
                RETURNING *
                "#,
            )
            .bind(AdminStatus::Closed.as_str())
            .bind(at)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
        };

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

        let project = lock_project(&mut *tx, id).await?;
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
        insert_audit_event(&mut *tx, &audit_event).await?;

        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
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
impl SchemaProbe for PostgresStore {
    async fn object_exists(&self, object: &SchemaObject) -> MetadataResult<bool> {
        let exists = match object {
            SchemaObject::Table(name) => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM information_schema.tables
                        WHERE table_schema = current_schema() AND table_name = $1
                    )
                    "#,
                )
                .bind(*name)
                .fetch_one(&self.pool)
                .await?
            }
            SchemaObject::Column { table, column } => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM information_schema.columns
                        WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
                    )
                    "#,
                )
                .bind(*table)
                .bind(*column)
                .fetch_one(&self.pool)
                .await?
            }
            SchemaObject::Function(name) => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM pg_proc p
                        JOIN pg_namespace n ON n.oid = p.pronamespace
                        WHERE n.nspname = current_schema() AND p.proname = $1
                    )
                    "#,
                )
                .bind(*name)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(exists)
    }
}
