//! Cleanup job definitions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

/// Phrase the caller must type to purge ghost file records.
pub const GHOST_CLEANUP_CONFIRMATION: &str = "CONFIRM CLEANUP";

/// Phrase the caller must type to purge expired storage snapshots.
pub const SNAPSHOT_CLEANUP_CONFIRMATION: &str = "CONFIRM CLEANUP SNAPSHOTS";

/// The bulk purge jobs available to administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupJob {
    /// Input file rows whose storage object was never created.
    GhostFiles,
    /// Daily storage snapshot rows older than the retention window.
    StorageSnapshots,
}

impl CleanupJob {
    pub const ALL: [Self; 2] = [Self::GhostFiles, Self::StorageSnapshots];

    /// Stable name used by the job execution log and the rate limiter.
    pub const fn job_id(&self) -> &'static str {
        match self {
            Self::GhostFiles => "admin_cleanup_ghost_files",
            Self::StorageSnapshots => "admin_cleanup_storage_snapshots",
        }
    }

    pub fn module(&self) -> &'static str {
        match self {
            Self::GhostFiles => "files",
            Self::StorageSnapshots => "storage",
        }
    }

    pub fn audit_action(&self) -> &'static str {
        match self {
            Self::GhostFiles => "ghost_files_cleanup",
            Self::StorageSnapshots => "storage_snapshots_cleanup",
        }
    }

    pub fn confirmation_phrase(&self) -> &'static str {
        match self {
            Self::GhostFiles => GHOST_CLEANUP_CONFIRMATION,
            Self::StorageSnapshots => SNAPSHOT_CLEANUP_CONFIRMATION,
        }
    }

    /// Exact match only. Whitespace and case are significant.
    pub fn check_confirmation(&self, supplied: &str) -> Result<()> {
        if supplied == self.confirmation_phrase() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "confirmation text must be exactly '{}'",
                self.confirmation_phrase()
            )))
        }
    }
}

/// Number of execute calls needed to drain `eligible` rows.
pub fn estimated_batches(eligible: u64, max_per_run: u64) -> u64 {
    if max_per_run == 0 {
        return 0;
    }
    eligible.div_ceil(max_per_run)
}

/// Bounds for caller-supplied retention windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub min_days: u32,
    pub max_days: u32,
    pub default_days: u32,
}

impl RetentionPolicy {
    /// Apply the default when absent and reject values outside `[min, max]`.
    pub fn resolve(&self, requested: Option<u32>) -> Result<u32> {
        let days = requested.unwrap_or(self.default_days);
        if days < self.min_days {
            return Err(Error::Validation(format!(
                "retention_days must be at least {}",
                self.min_days
            )));
        }
        if days > self.max_days {
            return Err(Error::Validation(format!(
                "retention_days must be at most {}",
                self.max_days
            )));
        }
        Ok(days)
    }
}

/// First day that is kept: rows with `day < cutoff` are eligible.
///
/// With any positive retention the current day is never eligible.
pub fn cutoff_day(today: Date, retention_days: u32) -> Result<Date> {
    today
        .checked_sub(Duration::days(i64::from(retention_days)))
        .ok_or_else(|| Error::Validation(format!("retention_days {retention_days} out of range")))
}
