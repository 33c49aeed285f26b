//! Storage backing state of tracked resources.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the object a resource row points at still exists in storage.
///
/// The state only moves forward: `present -> missing -> invalidated`.
/// `invalidated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    /// Written by ingestion once the object is stored.
    Present,
    /// Set by the drift detector when the object cannot be found.
    Missing,
    /// Set by reconciliation; the reference is formally dead.
    Invalidated,
}

impl StorageState {
    pub const ALL: [Self; 3] = [Self::Present, Self::Missing, Self::Invalidated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Missing => "missing",
            Self::Invalidated => "invalidated",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "storage_state",
                value: s.to_string(),
            })
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Present => 0,
            Self::Missing => 1,
            Self::Invalidated => 2,
        }
    }

    /// Single forward step, or staying put.
    pub fn can_transition_to(&self, next: StorageState) -> bool {
        next.rank() == self.rank() || next.rank() == self.rank() + 1
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalidated)
    }
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
