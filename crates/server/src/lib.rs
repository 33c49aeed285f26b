//! Engines and admin HTTP API for custodian.
//!
//! This crate provides:
//! - Storage reconciliation (missing -> invalidated) in bounded batches
//! - Rate-limited, audited cleanup jobs (ghost files, expired snapshots)
//! - Project lifecycle operations including audited hard delete
//! - Job execution tracking, fail-closed rate limiting and schema checks

pub mod cleanup;
pub mod context;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod ratelimit;
pub mod reconcile;
pub mod routes;
pub mod schema;
pub mod state;
pub mod tracker;

pub use context::{ActorId, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
