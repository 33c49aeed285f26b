//! Project lifecycle rules.
//!
//! A project moves along two independent axes:
//! - `operational_state` follows a fixed adjacency matrix driven by the
//!   ingestion/processing pipeline.
//! - `admin_status` records administrative closure and the retention clock
//!   that follows it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalState {
    Created,
    Uploading,
    Processing,
    Ready,
    Error,
    Archived,
}

impl OperationalState {
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::Uploading,
        Self::Processing,
        Self::Ready,
        Self::Error,
        Self::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "operational_state",
                value: s.to_string(),
            })
    }

    /// Destinations reachable in a single step.
    pub fn allowed_targets(&self) -> &'static [OperationalState] {
        use OperationalState::*;
        match self {
            Created => &[Uploading],
            Uploading => &[Processing, Error],
            Processing => &[Ready, Error],
            Ready => &[Processing, Archived],
            Error => &[Uploading, Processing],
            Archived => &[],
        }
    }

    pub fn can_transition_to(&self, target: OperationalState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    InProcess,
    Closed,
    RetentionGrace,
    DeletedByPolicy,
}

impl AdminStatus {
    pub const ALL: [Self; 4] = [
        Self::InProcess,
        Self::Closed,
        Self::RetentionGrace,
        Self::DeletedByPolicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Closed => "closed",
            Self::RetentionGrace => "retention_grace",
            Self::DeletedByPolicy => "deleted_by_policy",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "admin_status",
                value: s.to_string(),
            })
    }

    /// True once the project has been closed (or moved further along the
    /// retention clock).
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::InProcess)
    }
}

impl fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a lifecycle request against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already in the requested state; record a no-op and change nothing.
    NoOp,
    /// Apply the change.
    Apply,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Validate an `operational_state` change.
pub fn plan_transition(from: OperationalState, to: OperationalState) -> Result<Plan> {
    if from == to {
        return Ok(Plan::NoOp);
    }
    if from.can_transition_to(to) {
        return Ok(Plan::Apply);
    }
    Err(Error::InvalidTransition {
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
        allowed: from
            .allowed_targets()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    })
}

/// Validate a close request.
///
/// Closing is idempotent: a project that is already closed (or further along
/// the retention clock) yields a no-op regardless of its pipeline state.
pub fn plan_close(state: OperationalState, status: AdminStatus) -> Result<Plan> {
    if status.is_closed() {
        return Ok(Plan::NoOp);
    }
    if state == OperationalState::Processing {
        return Err(Error::NotAllowed(
            "cannot close project while processing".to_string(),
        ));
    }
    Ok(Plan::Apply)
}

/// Validate a hard delete request.
pub fn check_hard_delete(status: AdminStatus) -> Result<()> {
    if status.is_closed() {
        Ok(())
    } else {
        Err(Error::NotAllowed(
            "project must be closed before it can be hard deleted".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationalState::{Archived, Created, Processing, Ready, Uploading};

    #[test]
    fn test_adjacency_matrix() {
        let expected: &[(OperationalState, &[OperationalState])] = &[
            (Created, &[Uploading]),
            (Uploading, &[Processing, OperationalState::Error]),
            (Processing, &[Ready, OperationalState::Error]),
            (Ready, &[Processing, Archived]),
            (OperationalState::Error, &[Uploading, Processing]),
            (Archived, &[]),
        ];

        for (from, targets) in expected {
            for to in OperationalState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    targets.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_same_state_is_noop() {
        for state in OperationalState::ALL {
            assert_eq!(plan_transition(state, state).unwrap(), Plan::NoOp);
        }
    }

    #[test]
    fn test_invalid_transition_names_allowed_targets() {
        let err = plan_transition(Created, Ready).unwrap_err();
        match err {
            Error::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, "created");
                assert_eq!(to, "ready");
                assert_eq!(allowed, vec!["uploading".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_archived_is_terminal() {
        assert!(Archived.is_terminal());
        assert!(plan_transition(Archived, Ready).is_err());
    }

    #[test]
    fn test_close_rejected_while_processing() {
        let err = plan_close(Processing, AdminStatus::InProcess).unwrap_err();
        assert!(matches!(err, Error::NotAllowed(_)));
    }

    #[test]
    fn test_close_from_other_states() {
        for state in [
            Created,
            Uploading,
            Ready,
            OperationalState::Error,
            Archived,
        ] {
            assert_eq!(
                plan_close(state, AdminStatus::InProcess).unwrap(),
                Plan::Apply
            );
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        for status in [
            AdminStatus::Closed,
            AdminStatus::RetentionGrace,
            AdminStatus::DeletedByPolicy,
        ] {
            assert_eq!(plan_close(Ready, status).unwrap(), Plan::NoOp);
            assert_eq!(plan_close(Processing, status).unwrap(), Plan::NoOp);
        }
    }

    #[test]
    fn test_hard_delete_requires_closed() {
        assert!(check_hard_delete(AdminStatus::InProcess).is_err());
        assert!(check_hard_delete(AdminStatus::Closed).is_ok());
        assert!(check_hard_delete(AdminStatus::RetentionGrace).is_ok());
    }

    #[test]
    fn test_parse_round_trip() {
        for state in OperationalState::ALL {
            assert_eq!(OperationalState::parse(state.as_str()).unwrap(), state);
        }
        for status in AdminStatus::ALL {
            assert_eq!(AdminStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OperationalState::parse("deleted").is_err());
    }
}
