//! Storage reconciliation repository.

use crate::error::MetadataResult;
use crate::models::{AuditEventRow, TrackedResourceRow};
use async_trait::async_trait;
use custodian_core::StorageState;
use custodian_core::reconcile::is_truncated;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Tables holding rows that reference storage objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTable {
    InputFiles,
    ProductFiles,
}

impl TrackedTable {
    pub const ALL: [Self; 2] = [Self::InputFiles, Self::ProductFiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputFiles => "input_files",
            Self::ProductFiles => "product_files",
        }
    }
}

/// Per-table row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: TrackedTable,
    pub count: u64,
}

/// Eligible rows for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectCount {
    pub project_id: Uuid,
    pub count: u64,
}

/// Drift counters for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table: TrackedTable,
    /// `missing`, active and not archived (eligible for reconciliation).
    pub missing_active: u64,
    pub invalidated: u64,
}

/// One execute-mode reconciliation pass. The pass transaction also closes
/// the tracked execution as `success`, stamped `invalidated_at`.
#[derive(Debug, Clone)]
pub struct InvalidationBatch {
    /// Upper bound per table.
    pub limit: u32,
    pub project_id: Option<Uuid>,
    pub invalidated_at: OffsetDateTime,
    pub reason: String,
    pub execution_id: Uuid,
    pub started_at: OffsetDateTime,
    /// Eligible rows per table, counted before the pass.
    pub eligible_before: Vec<TableCount>,
}

/// Eligible and invalidated rows for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: TrackedTable,
    pub eligible: u64,
    pub invalidated: u64,
}

/// Result summary stored on the execution row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationSummary {
    pub scope: &'static str,
    pub project_id: Option<Uuid>,
    pub limit: u32,
    pub eligible_count: u64,
    pub invalidated_count: u64,
    /// Some table held more than `limit` eligible rows.
    pub truncated: bool,
    pub tables: Vec<TableReport>,
}

impl InvalidationSummary {
    pub(crate) fn new(batch: &InvalidationBatch, invalidated: &[TableCount]) -> Self {
        let tables: Vec<TableReport> = TrackedTable::ALL
            .iter()
            .map(|&table| {
                let count_in = |counts: &[TableCount]| {
                    counts
                        .iter()
                        .find(|c| c.table == table)
                        .map_or(0, |c| c.count)
                };
                TableReport {
                    table,
                    eligible: count_in(&batch.eligible_before),
                    invalidated: count_in(invalidated),
                }
            })
            .collect();

        Self {
            scope: if batch.project_id.is_some() {
                "project"
            } else {
                "all"
            },
            project_id: batch.project_id,
            limit: batch.limit,
            eligible_count: tables.iter().map(|t| t.eligible).sum(),
            invalidated_count: tables.iter().map(|t| t.invalidated).sum(),
            truncated: is_truncated(tables.iter().map(|t| t.eligible), batch.limit),
            tables,
        }
    }
}

/// Repository for tracked resources and their storage state.
#[async_trait]
pub trait ReconcileRepo: Send + Sync {
    async fn create_tracked_resource(
        &self,
        table: TrackedTable,
        resource: &TrackedResourceRow,
    ) -> MetadataResult<()>;

    async fn get_tracked_resource(
        &self,
        table: TrackedTable,
        id: Uuid,
    ) -> MetadataResult<Option<TrackedResourceRow>>;

    /// Move a resource forward along `present -> missing -> invalidated`.
    /// Backward moves are rejected with `InvalidStateTransition`.
    async fn set_storage_state(
        &self,
        table: TrackedTable,
        id: Uuid,
        next: StorageState,
        at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Rows eligible for invalidation in `table`.
    async fn count_reconcile_eligible(
        &self,
        table: TrackedTable,
        project_id: Option<Uuid>,
    ) -> MetadataResult<u64>;

    /// Eligible rows across all tables grouped by project, largest first.
    async fn count_reconcile_eligible_by_project(&self) -> MetadataResult<Vec<ProjectCount>>;

    /// Invalidate up to `batch.limit` eligible rows per table.
    ///
    /// In one transaction: insert `audit`, invalidate, then mark the
    /// execution `success` with the resulting summary. Rows locked by a
    /// concurrent pass are skipped.
    async fn invalidate_missing(
        &self,
        batch: &InvalidationBatch,
        audit: &AuditEventRow,
    ) -> MetadataResult<InvalidationSummary>;

    async fn reconcile_stats(&self, project_id: Option<Uuid>) -> MetadataResult<Vec<TableStats>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(limit: u32, input: u64, product: u64) -> InvalidationBatch {
        InvalidationBatch {
            limit,
            project_id: None,
            invalidated_at: OffsetDateTime::UNIX_EPOCH,
            reason: "storage_missing".to_string(),
            execution_id: Uuid::new_v4(),
            started_at: OffsetDateTime::UNIX_EPOCH,
            eligible_before: vec![
                TableCount {
                    table: TrackedTable::InputFiles,
                    count: input,
                },
                TableCount {
                    table: TrackedTable::ProductFiles,
                    count: product,
                },
            ],
        }
    }

    #[test]
    fn test_summary_limit_applies_per_table() {
        let invalidated = [
            TableCount {
                table: TrackedTable::InputFiles,
                count: 2,
            },
            TableCount {
                table: TrackedTable::ProductFiles,
                count: 1,
            },
        ];
        let summary = InvalidationSummary::new(&batch(2, 2, 1), &invalidated);
        assert_eq!(summary.scope, "all");
        assert_eq!(summary.eligible_count, 3);
        assert_eq!(summary.invalidated_count, 3);
        assert!(!summary.truncated);

        let summary = InvalidationSummary::new(&batch(2, 3, 0), &invalidated[..1]);
        assert!(summary.truncated);
        assert_eq!(summary.tables[1].invalidated, 0);
    }
}
