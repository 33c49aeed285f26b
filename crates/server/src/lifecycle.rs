//! Project lifecycle operations.
//!
//! The adjacency matrix and close/hard-delete guards live in
//! `custodian_core::lifecycle`; the store applies them under a row lock in
//! the same transaction that records the audit event. This layer validates
//! input, stamps times from the clock and accounts for the outcome.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use custodian_core::{Clock, OperationalState};
use custodian_metadata::MetadataStore;
use custodian_metadata::models::ProjectRow;
use custodian_metadata::repos::{HardDeleteOutcome, LifecycleOutcome};
use std::sync::Arc;
use uuid::Uuid;

const MAX_SLUG_LEN: usize = 64;
const MAX_NAME_LEN: usize = 256;
const MAX_REASON_LEN: usize = 1024;

fn validate_slug(slug: &str) -> ApiResult<()> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(ApiError::Validation(format!(
            "slug must be 1-{MAX_SLUG_LEN} characters"
        )));
    }
    let valid = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid || slug.starts_with('-') {
        return Err(ApiError::Validation(
            "slug may only contain lowercase letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

pub struct LifecycleService {
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
}

impl LifecycleService {
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>) -> Self {
        Self { metadata, clock }
    }

    /// New projects start `created` / `in_process`.
    pub async fn create_project(
        &self,
        owner_id: Uuid,
        slug: &str,
        name: &str,
    ) -> ApiResult<ProjectRow> {
        validate_slug(slug)?;
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::Validation(format!(
                "name must be 1-{MAX_NAME_LEN} characters"
            )));
        }

        let project = ProjectRow::new(owner_id, slug, name, self.clock.now_utc());
        self.metadata.create_project(&project).await?;

        tracing::info!(
            project_id = %project.id,
            owner_id = %owner_id,
            slug = %slug,
            "Project created"
        );
        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> ApiResult<ProjectRow> {
        self.metadata
            .get_project(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("project {id}")))
    }

    /// Move `operational_state` along the adjacency matrix. Requesting the
    /// current state is an audited no-op.
    pub async fn transition(
        &self,
        id: Uuid,
        target: OperationalState,
        actor_id: Option<&str>,
    ) -> ApiResult<LifecycleOutcome> {
        let outcome = self
            .metadata
            .transition_project(id, target, actor_id, self.clock.now_utc())
            .await
            .map_err(ApiError::from)
            .inspect_err(metrics::record_audit_failure)?;

        if !outcome.noop {
            metrics::LIFECYCLE_TRANSITIONS
                .with_label_values(&["transition"])
                .inc();
        }
        tracing::info!(
            project_id = %id,
            to = %target,
            noop = outcome.noop,
            "Project state transition"
        );
        Ok(outcome)
    }

    /// Set `admin_status = closed`. Refused while processing; idempotent.
    pub async fn close(
        &self,
        id: Uuid,
        reason: &str,
        actor_id: Option<&str>,
    ) -> ApiResult<LifecycleOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ApiError::Validation("close reason is required".to_string()));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(ApiError::Validation(format!(
                "close reason exceeds {MAX_REASON_LEN} characters"
            )));
        }

        let outcome = self
            .metadata
            .close_project(id, reason, actor_id, self.clock.now_utc())
            .await
            .map_err(ApiError::from)
            .inspect_err(metrics::record_audit_failure)?;

        if !outcome.noop {
            metrics::LIFECYCLE_TRANSITIONS.with_label_values(&["close"]).inc();
        }
        tracing::info!(project_id = %id, noop = outcome.noop, "Project closed");
        Ok(outcome)
    }

    /// Physically remove a closed project after recording its snapshot.
    pub async fn hard_delete(
        &self,
        id: Uuid,
        actor_id: Option<&str>,
    ) -> ApiResult<HardDeleteOutcome> {
        let outcome = match self
            .metadata
            .hard_delete_project(id, actor_id, self.clock.now_utc())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let e = ApiError::from(e);
                metrics::record_audit_failure(&e);
                if matches!(e, ApiError::AuditWriteFailed { .. }) {
                    tracing::error!(project_id = %id, error = %e, "Hard delete aborted, project kept");
                }
                return Err(e);
            }
        };

        metrics::LIFECYCLE_TRANSITIONS
            .with_label_values(&["hard_delete"])
            .inc();
        tracing::warn!(
            project_id = %id,
            slug = %outcome.project.slug,
            event_id = %outcome.audit_event.event_id,
            "Project hard deleted"
        );
        Ok(outcome)
    }
}
