//! Core domain rules for the custodian reconciliation service.
//!
//! This crate holds everything that can be decided without touching the
//! record store:
//! - Project lifecycle adjacency matrix and close/hard-delete guards
//! - Storage state monotonicity for tracked resources
//! - Cleanup job definitions, confirmation phrases and retention math
//! - Reconciliation request validation
//! - Job execution status and cooldown evaluation

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod log_once;
pub mod reconcile;
pub mod storage_state;

pub use cleanup::{CleanupJob, RetentionPolicy};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use job::{CooldownDecision, JobStatus};
pub use lifecycle::{AdminStatus, OperationalState, Plan};
pub use log_once::LogOnce;
pub use reconcile::{ReconcileLimits, ReconcileMode, ReconcilePlan, ReconcileRequest, ReconcileScope};
pub use storage_state::StorageState;
