//! Administrative job execution rules.

use crate::cleanup::CleanupJob;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// `job_type` recorded for operator-triggered runs.
pub const MANUAL_ADMIN_JOB_TYPE: &str = "manual_admin";

/// Job id for execute-mode storage reconciliation.
pub const RECONCILE_JOB_ID: &str = "admin_reconcile_storage";

/// Jobs reported in the jobs overview even when they never ran.
pub const KNOWN_ADMIN_JOBS: [&str; 3] = [
    RECONCILE_JOB_ID,
    CleanupJob::GhostFiles.job_id(),
    CleanupJob::StorageSnapshots.job_id(),
];

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(Error::UnknownVariant {
                kind: "job_status",
                value: other.to_string(),
            }),
        }
    }

    /// Statuses that start the cooldown window.
    pub fn blocks_rerun(&self) -> bool {
        matches!(self, Self::Running | Self::Success)
    }
}

/// Result of checking a job against its cooldown window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Blocked { next_allowed_at: OffsetDateTime },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn next_allowed_at(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Allowed => None,
            Self::Blocked { next_allowed_at } => Some(*next_allowed_at),
        }
    }
}

/// Decide whether a job may start given the start time of its latest
/// running-or-successful execution.
pub fn evaluate_cooldown(
    last_started_at: Option<OffsetDateTime>,
    cooldown: Duration,
    now: OffsetDateTime,
) -> CooldownDecision {
    let Some(started_at) = last_started_at else {
        return CooldownDecision::Allowed;
    };
    let next_allowed_at = started_at + cooldown;
    if now >= next_allowed_at {
        CooldownDecision::Allowed
    } else {
        CooldownDecision::Blocked { next_allowed_at }
    }
}

/// Truncate an error message to at most `max_chars` characters.
pub fn truncate_error_message(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}
