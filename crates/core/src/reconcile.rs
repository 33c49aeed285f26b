//! Reconciliation request validation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which resources a reconciliation run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileScope {
    All,
    Project(Uuid),
}

impl ReconcileScope {
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            Self::All => None,
            Self::Project(id) => Some(*id),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Project(_) => "project",
        }
    }
}

/// Scope selector as sent by callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[default]
    All,
    Project,
}

/// Caller input for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub scope: ScopeKind,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub confirm: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    DryRun,
    Execute,
}

/// Limits applied to `ReconcileRequest::limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

/// A validated reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub scope: ReconcileScope,
    pub mode: ReconcileMode,
    /// Maximum rows invalidated per resource table.
    pub limit: u32,
}

impl ReconcileRequest {
    /// Validate the request without touching the record store.
    pub fn plan(&self, limits: ReconcileLimits) -> Result<ReconcilePlan> {
        let limit = self.limit.unwrap_or(limits.default_limit);
        if limit == 0 || limit > limits.max_limit {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                limits.max_limit
            )));
        }

        let scope = match (self.scope, self.project_id) {
            (ScopeKind::All, _) => ReconcileScope::All,
            (ScopeKind::Project, Some(id)) => ReconcileScope::Project(id),
            (ScopeKind::Project, None) => {
                return Err(Error::Validation(
                    "project_id is required when scope is 'project'".to_string(),
                ));
            }
        };

        let mode = if self.dry_run {
            ReconcileMode::DryRun
        } else if self.confirm {
            ReconcileMode::Execute
        } else {
            return Err(Error::Validation(
                "confirm must be true when dry_run is false".to_string(),
            ));
        };

        Ok(ReconcilePlan { scope, mode, limit })
    }
}

/// Whether a pass leaves eligible rows behind.
///
/// The limit bounds each table separately, so a pass is truncated only when
/// some single table holds more than `limit` eligible rows. Two input rows
/// and one product row at limit 2 are all invalidated in one pass.
pub fn is_truncated(eligible_per_table: impl IntoIterator<Item = u64>, limit: u32) -> bool {
    eligible_per_table
        .into_iter()
        .any(|eligible| eligible > u64::from(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ReconcileLimits = ReconcileLimits {
        default_limit: 5000,
        max_limit: 10000,
    };

    fn request() -> ReconcileRequest {
        ReconcileRequest {
            scope: ScopeKind::All,
            project_id: None,
            dry_run: true,
            limit: None,
            confirm: false,
        }
    }

    #[test]
    fn test_defaults() {
        let plan = request().plan(LIMITS).unwrap();
        assert_eq!(plan.scope, ReconcileScope::All);
        assert_eq!(plan.mode, ReconcileMode::DryRun);
        assert_eq!(plan.limit, 5000);
    }

    #[test]
    fn test_limit_bounds() {
        let mut req = request();
        req.limit = Some(0);
        assert!(req.plan(LIMITS).is_err());
        req.limit = Some(10001);
        assert!(req.plan(LIMITS).is_err());
        req.limit = Some(10000);
        assert_eq!(req.plan(LIMITS).unwrap().limit, 10000);
        req.limit = Some(1);
        assert_eq!(req.plan(LIMITS).unwrap().limit, 1);
    }

    #[test]
    fn test_project_scope_requires_id() {
        let mut req = request();
        req.scope = ScopeKind::Project;
        assert!(req.plan(LIMITS).is_err());

        let id = Uuid::new_v4();
        req.project_id = Some(id);
        assert_eq!(req.plan(LIMITS).unwrap().scope, ReconcileScope::Project(id));
    }

    #[test]
    fn test_execute_requires_confirm() {
        let mut req = request();
        req.dry_run = false;
        assert!(matches!(req.plan(LIMITS), Err(Error::Validation(_))));

        req.confirm = true;
        assert_eq!(req.plan(LIMITS).unwrap().mode, ReconcileMode::Execute);
    }

    #[test]
    fn test_truncation_is_per_table() {
        assert!(!is_truncated([2, 1], 2));
        assert!(is_truncated([3, 0], 2));
        assert!(is_truncated([0, 3], 2));
        assert!(!is_truncated(Vec::new(), 1));
    }

    #[test]
    fn test_deserialize_defaults_to_dry_run() {
        let req: ReconcileRequest = serde_json::from_str("{}").unwrap();
        assert!(req.dry_run);
        assert_eq!(req.scope, ScopeKind::All);
    }
}
