//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use custodian_core::{AdminStatus, JobStatus, OperationalState, StorageState};
use sqlx::FromRow;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Projects
// =============================================================================

/// Project record.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Unique per owner.
    pub slug: String,
    pub name: String,
    pub operational_state: String,
    pub admin_status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub ready_at: Option<OffsetDateTime>,
    pub archived_at: Option<OffsetDateTime>,
    /// Anchors the retention clock.
    pub closed_at: Option<OffsetDateTime>,
}

impl ProjectRow {
    /// A freshly created project (`created` / `in_process`).
    pub fn new(owner_id: Uuid, slug: &str, name: &str, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            slug: slug.to_string(),
            name: name.to_string(),
            operational_state: OperationalState::Created.as_str().to_string(),
            admin_status: AdminStatus::InProcess.as_str().to_string(),
            created_at: now,
            updated_at: now,
            ready_at: None,
            archived_at: None,
            closed_at: None,
        }
    }

    pub fn operational_state(&self) -> MetadataResult<OperationalState> {
        Ok(OperationalState::parse(&self.operational_state)?)
    }

    pub fn admin_status(&self) -> MetadataResult<AdminStatus> {
        Ok(AdminStatus::parse(&self.admin_status)?)
    }

    /// Snapshot written to the audit ledger before destructive operations.
    pub fn audit_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "owner_id": self.owner_id,
            "slug": self.slug,
            "name": self.name,
            "operational_state": self.operational_state,
            "admin_status": self.admin_status,
            "closed_at": self.closed_at.and_then(|t| t.format(&Rfc3339).ok()),
        })
    }
}

// =============================================================================
// Tracked resources (input files, product files)
// =============================================================================

/// A metadata row that points at an object in storage.
#[derive(Debug, Clone, FromRow)]
pub struct TrackedResourceRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub storage_state: String,
    /// False when the storage object was never written (ghost record).
    pub storage_exists: bool,
    pub is_active: bool,
    pub is_archived: bool,
    pub created_at: OffsetDateTime,
    pub invalidated_at: Option<OffsetDateTime>,
    pub invalidation_reason: Option<String>,
}

impl TrackedResourceRow {
    /// A resource whose object has been stored.
    pub fn present(project_id: Uuid, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            storage_state: StorageState::Present.as_str().to_string(),
            storage_exists: true,
            is_active: true,
            is_archived: false,
            created_at,
            invalidated_at: None,
            invalidation_reason: None,
        }
    }

    /// An input file registered by ingestion whose upload never completed.
    pub fn ghost(project_id: Uuid, created_at: OffsetDateTime) -> Self {
        Self {
            storage_exists: false,
            ..Self::present(project_id, created_at)
        }
    }

    pub fn storage_state(&self) -> MetadataResult<StorageState> {
        Ok(StorageState::parse(&self.storage_state)?)
    }
}

// =============================================================================
// Storage snapshots
// =============================================================================

/// Daily storage usage snapshot (metadata only, no storage object behind it).
#[derive(Debug, Clone, FromRow)]
pub struct StorageSnapshotRow {
    pub day: Date,
    pub total_bytes: i64,
    pub object_count: i64,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Job executions
// =============================================================================

/// One run of an administrative job.
#[derive(Debug, Clone, FromRow)]
pub struct JobExecutionRow {
    pub execution_id: Uuid,
    /// Stable job name, e.g. `admin_cleanup_ghost_files`.
    pub job_id: String,
    pub job_type: String,
    pub module: String,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    pub status: String,
    /// JSON result summary, set on success.
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
}

impl JobExecutionRow {
    pub fn running(job_id: &str, job_type: &str, module: &str, started_at: OffsetDateTime) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            module: module.to_string(),
            started_at,
            finished_at: None,
            duration_ms: None,
            status: JobStatus::Running.as_str().to_string(),
            result_summary: None,
            error_message: None,
        }
    }

    pub fn status(&self) -> MetadataResult<JobStatus> {
        Ok(JobStatus::parse(&self.status)?)
    }
}

// =============================================================================
// Audit ledger
// =============================================================================

/// Append-only audit record.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEventRow {
    pub event_id: Uuid,
    /// None for operations that are not tied to one project.
    pub project_id: Option<Uuid>,
    pub actor_id: Option<String>,
    pub action_type: String,
    pub details: String,
    pub metadata_json: String,
    pub created_at: OffsetDateTime,
}

impl AuditEventRow {
    /// Build an event. `metadata` must be a JSON object; `actor` is added to
    /// it (`system` when no actor is known).
    pub fn new(
        project_id: Option<Uuid>,
        actor_id: Option<&str>,
        action_type: &str,
        details: impl Into<String>,
        metadata: serde_json::Value,
        created_at: OffsetDateTime,
    ) -> MetadataResult<Self> {
        let mut metadata = match metadata {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        metadata.insert(
            "actor".to_string(),
            serde_json::Value::String(actor_id.unwrap_or("system").to_string()),
        );

        Ok(Self {
            event_id: Uuid::new_v4(),
            project_id,
            actor_id: actor_id.map(str::to_string),
            action_type: action_type.to_string(),
            details: details.into(),
            metadata_json: serde_json::to_string(&metadata)?,
            created_at,
        })
    }

    pub fn metadata(&self) -> MetadataResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.metadata_json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_defaults_actor_to_system() {
        let event = AuditEventRow::new(
            None,
            None,
            "storage_reconcile",
            "scope=all",
            serde_json::json!({"limit": 10}),
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        let metadata = event.metadata().unwrap();
        assert_eq!(metadata["actor"], "system");
        assert_eq!(metadata["limit"], 10);
        assert!(event.actor_id.is_none());
    }

    #[test]
    fn test_audit_event_records_actor() {
        let event = AuditEventRow::new(
            Some(Uuid::new_v4()),
            Some("ops@example.com"),
            "project_close",
            "closed",
            serde_json::Value::Null,
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert_eq!(event.metadata().unwrap()["actor"], "ops@example.com");
    }

    #[test]
    fn test_new_project_starts_created_in_process() {
        let project = ProjectRow::new(Uuid::new_v4(), "alpha", "Alpha", OffsetDateTime::now_utc());
        assert_eq!(
            project.operational_state().unwrap(),
            OperationalState::Created
        );
        assert_eq!(project.admin_status().unwrap(), AdminStatus::InProcess);
    }
}
