//! Record store abstraction and implementations for custodian.
//!
//! This crate owns every table the service reads or writes:
//! - Projects and their lifecycle columns
//! - Tracked resources (`input_files`, `product_files`) and their storage state
//! - Daily storage snapshots
//! - Administrative job executions
//! - The append-only audit ledger
//!
//! Every destructive write records its audit event inside the same
//! transaction, before the rows are touched.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use custodian_core::config::MetadataConfig;
use std::sync::Arc;

/// Open the record store named by `config` and apply its schema.
pub async fn open(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store: Arc<dyn MetadataStore> = match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => Arc::new(SqliteStore::new(path, *query_timeout_secs).await?),
        MetadataConfig::Postgres { .. } => Arc::new(PostgresStore::from_config(config).await?),
    };
    Ok(store)
}
