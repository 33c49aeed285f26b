//! Bulk purge repository.

use crate::error::MetadataResult;
use crate::models::{AuditEventRow, StorageSnapshotRow};
use async_trait::async_trait;
use serde::Serialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// What a purge removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeTarget {
    /// Active input file rows whose storage object was never created.
    GhostFiles,
    /// Snapshot rows with `day < cutoff`.
    SnapshotsBefore { cutoff: Date, retention_days: u32 },
}

/// One execute-mode purge. The purge transaction also closes the tracked
/// execution as `success`.
#[derive(Debug, Clone)]
pub struct PurgeRequest {
    pub target: PurgeTarget,
    pub limit: u32,
    pub execution_id: Uuid,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub eligible_before: u64,
}

/// Result summary stored on the execution row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub deleted_count: u64,
    pub eligible_before: u64,
    pub remaining_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

impl CleanupSummary {
    pub(crate) fn new(request: &PurgeRequest, deleted_count: u64, remaining_after: u64) -> Self {
        let (cutoff_day, retention_days) = match request.target {
            PurgeTarget::GhostFiles => (None, None),
            PurgeTarget::SnapshotsBefore {
                cutoff,
                retention_days,
            } => (Some(cutoff.to_string()), Some(retention_days)),
        };
        Self {
            deleted_count,
            eligible_before: request.eligible_before,
            remaining_after,
            cutoff_day,
            retention_days,
        }
    }
}

/// Repository for ghost records and retention-expired snapshots.
#[async_trait]
pub trait CleanupRepo: Send + Sync {
    async fn count_purge_eligible(&self, target: &PurgeTarget) -> MetadataResult<u64>;

    /// Delete up to `request.limit` eligible rows ordered by a stable key.
    ///
    /// In one transaction: insert `audit`, delete, count what is left and
    /// mark the execution `success` with the resulting summary.
    async fn purge(
        &self,
        request: &PurgeRequest,
        audit: &AuditEventRow,
    ) -> MetadataResult<CleanupSummary>;

    async fn insert_storage_snapshot(&self, snapshot: &StorageSnapshotRow) -> MetadataResult<()>;
}
