//! Storage reconciliation engine.
//!
//! Finds tracked resources whose storage object is known to be missing and
//! marks them `invalidated`. Rows are never deleted and storage is never
//! touched.
//!
//! Dry runs only count. Execute runs invalidate at most `limit` rows per
//! table in one transaction that first writes the audit event and last
//! closes the execution as `success`. On PostgreSQL
//! rows claimed by a concurrent run are skipped, so parallel runs partition
//! the work.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::schema::require_objects;
use crate::tracker::{ExecutionHandle, JobTracker};
use custodian_core::config::ReconcileConfig;
use custodian_core::job::RECONCILE_JOB_ID;
use custodian_core::reconcile::is_truncated;
use custodian_core::{LogOnce, ReconcileMode, ReconcileRequest, ReconcileScope};
use custodian_metadata::MetadataStore;
use custodian_metadata::models::AuditEventRow;
use custodian_metadata::repos::{
    InvalidationBatch, ProjectCount, SchemaObject, TableCount, TableReport, TableStats,
    TrackedTable,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const RECONCILE_MODULE: &str = "storage";
const RECONCILE_AUDIT_ACTION: &str = "storage_reconcile";

/// Objects the reconciliation statements depend on.
const REQUIRED_OBJECTS: [SchemaObject; 8] = [
    SchemaObject::Table("input_files"),
    SchemaObject::Table("product_files"),
    SchemaObject::Column {
        table: "input_files",
        column: "storage_state",
    },
    SchemaObject::Column {
        table: "input_files",
        column: "invalidated_at",
    },
    SchemaObject::Column {
        table: "input_files",
        column: "invalidation_reason",
    },
    SchemaObject::Column {
        table: "product_files",
        column: "storage_state",
    },
    SchemaObject::Column {
        table: "product_files",
        column: "invalidated_at",
    },
    SchemaObject::Column {
        table: "product_files",
        column: "invalidation_reason",
    },
];

/// Outcome of one reconciliation call.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub scope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub dry_run: bool,
    /// Applied per table.
    pub limit: u32,
    pub eligible_count: u64,
    pub invalidated_count: u64,
    /// Some single table holds more than `limit` eligible rows, so another
    /// pass is needed. The limit is per table: 2 input rows and 1 product
    /// row at limit 2 are all invalidated and the report is not truncated,
    /// even though `eligible_count` exceeds `limit`.
    pub truncated: bool,
    pub tables: Vec<TableReport>,
    /// Eligible rows per project, largest first. Dry runs with scope `all` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_project: Option<Vec<ProjectCount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

pub struct ReconcileEngine {
    metadata: Arc<dyn MetadataStore>,
    tracker: JobTracker,
    log_once: Arc<LogOnce>,
    config: ReconcileConfig,
}

impl ReconcileEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        tracker: JobTracker,
        log_once: Arc<LogOnce>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            metadata,
            tracker,
            log_once,
            config,
        }
    }

    /// Count, and in execute mode invalidate, missing resources.
    pub async fn run(
        &self,
        request: &ReconcileRequest,
        actor_id: Option<&str>,
    ) -> ApiResult<ReconcileReport> {
        // Input problems are rejected before any database access.
        let plan = request.plan(self.config.limits())?;
        let project_id = plan.scope.project_id();

        require_objects(self.metadata.as_ref(), &self.log_once, &REQUIRED_OBJECTS).await?;

        if let Some(project_id) = project_id {
            self.metadata
                .get_project(project_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
        }

        let mut tables = Vec::with_capacity(TrackedTable::ALL.len());
        for table in TrackedTable::ALL {
            let eligible = self
                .metadata
                .count_reconcile_eligible(table, project_id)
                .await?;
            tables.push(TableReport {
                table,
                eligible,
                invalidated: 0,
            });
        }

        let eligible_count: u64 = tables.iter().map(|t| t.eligible).sum();
        let truncated = is_truncated(tables.iter().map(|t| t.eligible), plan.limit);

        let mut report = ReconcileReport {
            scope: plan.scope.as_str(),
            project_id,
            dry_run: plan.mode == ReconcileMode::DryRun,
            limit: plan.limit,
            eligible_count,
            invalidated_count: 0,
            truncated,
            tables,
            by_project: None,
            execution_id: None,
        };

        match plan.mode {
            ReconcileMode::DryRun => {
                if plan.scope == ReconcileScope::All {
                    report.by_project =
                        Some(self.metadata.count_reconcile_eligible_by_project().await?);
                }
                tracing::debug!(
                    scope = report.scope,
                    eligible = eligible_count,
                    "Reconciliation dry run"
                );
                Ok(report)
            }
            ReconcileMode::Execute if eligible_count == 0 => {
                // Nothing left to invalidate: repeated runs converge here.
                tracing::info!(scope = report.scope, "Reconciliation found nothing eligible");
                Ok(report)
            }
            ReconcileMode::Execute => self.execute(report, plan.scope, actor_id).await,
        }
    }

    async fn execute(
        &self,
        mut report: ReconcileReport,
        scope: ReconcileScope,
        actor_id: Option<&str>,
    ) -> ApiResult<ReconcileReport> {
        let handle = self.tracker.start(RECONCILE_JOB_ID, RECONCILE_MODULE).await?;
        report.execution_id = Some(handle.execution_id);

        // The success row commits with the invalidations; any error leaves
        // the execution open for `finish_failed`.
        match self.invalidate(&mut report, &handle, scope, actor_id).await {
            Ok(()) => Ok(report),
            Err(e) => {
                metrics::record_audit_failure(&e);
                self.tracker.finish_failed(&handle, &e).await;
                Err(e)
            }
        }
    }

    async fn invalidate(
        &self,
        report: &mut ReconcileReport,
        handle: &ExecutionHandle,
        scope: ReconcileScope,
        actor_id: Option<&str>,
    ) -> ApiResult<()> {
        let now = self.tracker.now();
        let eligible: serde_json::Map<String, serde_json::Value> = report
            .tables
            .iter()
            .map(|t| (t.table.as_str().to_string(), t.eligible.into()))
            .collect();

        let audit = AuditEventRow::new(
            scope.project_id(),
            actor_id,
            RECONCILE_AUDIT_ACTION,
            format!(
                "invalidate up to {} missing resources per table (scope={})",
                report.limit, report.scope
            ),
            serde_json::json!({
                "scope": report.scope,
                "execution_id": handle.execution_id,
                "limit": report.limit,
                "eligible": eligible,
                "reason": self.config.invalidation_reason,
            }),
            now,
        )?;

        let batch = InvalidationBatch {
            limit: report.limit,
            project_id: scope.project_id(),
            invalidated_at: now,
            reason: self.config.invalidation_reason.clone(),
            execution_id: handle.execution_id,
            started_at: handle.started_at,
            eligible_before: report
                .tables
                .iter()
                .map(|t| TableCount {
                    table: t.table,
                    count: t.eligible,
                })
                .collect(),
        };
        let summary = self.metadata.invalidate_missing(&batch, &audit).await?;
        self.tracker.record_committed_success(handle, now);

        for table in &summary.tables {
            metrics::RECONCILE_INVALIDATED
                .with_label_values(&[table.table.as_str()])
                .inc_by(table.invalidated);
        }
        report.invalidated_count = summary.invalidated_count;
        report.tables = summary.tables;

        tracing::info!(
            scope = report.scope,
            project_id = ?report.project_id,
            eligible = report.eligible_count,
            invalidated = report.invalidated_count,
            truncated = report.truncated,
            "Reconciliation invalidated missing resources"
        );
        Ok(())
    }

    /// Missing and invalidated counts per table.
    pub async fn stats(&self, project_id: Option<Uuid>) -> ApiResult<Vec<TableStats>> {
        require_objects(self.metadata.as_ref(), &self.log_once, &REQUIRED_OBJECTS).await?;
        Ok(self.metadata.reconcile_stats(project_id).await?)
    }
}
