//! Project lifecycle repository.

use crate::error::MetadataResult;
use crate::models::{AuditEventRow, ProjectRow};
use async_trait::async_trait;
use custodian_core::OperationalState;
use time::OffsetDateTime;
use uuid::Uuid;

/// Result of an audited lifecycle change.
#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    /// Project as stored after the operation.
    pub project: ProjectRow,
    /// True when nothing changed (already in the requested state).
    pub noop: bool,
    /// The audit event written for the request.
    pub audit_event: AuditEventRow,
}

/// Result of a hard delete.
#[derive(Debug, Clone)]
pub struct HardDeleteOutcome {
    /// Project as it was just before deletion.
    pub project: ProjectRow,
    pub audit_event: AuditEventRow,
}

/// Repository for projects.
///
/// Every mutating method runs in one transaction that reads the project
/// under a row lock, validates the request against the lifecycle rules,
/// writes the audit event and only then changes the project.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Returns `AlreadyExists` when the owner already has a project with this slug.
    async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()>;

    async fn get_project(&self, id: Uuid) -> MetadataResult<Option<ProjectRow>>;

    async fn transition_project(
        &self,
        id: Uuid,
        target: OperationalState,
        actor_id: Option<&str>,
        at: OffsetDateTime,
    ) -> MetadataResult<LifecycleOutcome>;

    async fn close_project(
        &self,
        id: Uuid,
        reason: &str,
        actor_id: Option<&str>,
        at: OffsetDateTime,
    ) -> MetadataResult<LifecycleOutcome>;

    /// Physically remove a closed project. The audit insert must succeed
    /// before the delete runs; exactly one row must be deleted.
    async fn hard_delete_project(
        &self,
        id: Uuid,
        actor_id: Option<&str>,
        at: OffsetDateTime,
    ) -> MetadataResult<HardDeleteOutcome>;
}
