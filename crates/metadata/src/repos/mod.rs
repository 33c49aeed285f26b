//! Repository traits for metadata operations.

pub mod audit;
pub mod cleanup;
pub mod jobs;
pub mod projects;
pub mod reconcile;
pub mod schema;

pub use audit::{AuditQuery, AuditRepo};
pub use cleanup::{CleanupRepo, CleanupSummary, PurgeRequest, PurgeTarget};
pub use jobs::{JobExecutionRepo, JobFinish, JobKpis};
pub use projects::{HardDeleteOutcome, LifecycleOutcome, ProjectRepo};
pub use reconcile::{
    InvalidationBatch, InvalidationSummary, ProjectCount, ReconcileRepo, TableCount, TableReport,
    TableStats, TrackedTable,
};
pub use schema::{SchemaObject, SchemaProbe};
