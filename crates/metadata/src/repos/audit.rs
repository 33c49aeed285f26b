//! Audit ledger repository.

use crate::error::MetadataResult;
use crate::models::AuditEventRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Maximum page size for audit listings.
pub const MAX_AUDIT_PAGE: u32 = 500;

/// Filters for listing audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub project_id: Option<Uuid>,
    pub action_type: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl AuditQuery {
    /// Limit clamped to `[1, MAX_AUDIT_PAGE]`.
    pub fn page_size(&self) -> u32 {
        self.limit.clamp(1, MAX_AUDIT_PAGE)
    }
}

/// Repository for the append-only audit ledger.
///
/// Operations that mutate other tables write their audit event inside their
/// own transaction; this trait covers standalone writes and reads.
#[async_trait]
pub trait AuditRepo: Send + Sync {
    /// Append an audit event. Failures are reported as `MetadataError::AuditWrite`.
    async fn record_audit_event(&self, event: &AuditEventRow) -> MetadataResult<()>;

    /// List audit events, newest first.
    async fn list_audit_events(&self, query: &AuditQuery) -> MetadataResult<Vec<AuditEventRow>>;
}
