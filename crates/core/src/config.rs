//! Configuration types shared across crates.

use crate::cleanup::RetentionPolicy;
use crate::reconcile::ReconcileLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// PostgreSQL SSL mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node, tests).
    Sqlite {
        path: PathBuf,
        /// Advisory only; SQLite cannot cancel running statements.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database. Either `url` or `host` + `database` is required.
    Postgres {
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300000) // 5 minutes
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/custodian.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields"
                        .to_string(),
                ),
            },
        }
    }
}

/// Bulk cleanup job settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Hard cap on rows deleted by a single execute call.
    #[serde(default = "default_max_records_per_run")]
    pub max_records_per_run: u32,
    /// Minimum time between runs of the same job.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_min_retention_days")]
    pub min_retention_days: u32,
    #[serde(default = "default_max_retention_days")]
    pub max_retention_days: u32,
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,
    /// Stored error messages are cut to this many characters.
    #[serde(default = "default_error_message_max_len")]
    pub error_message_max_len: usize,
}

fn default_max_records_per_run() -> u32 {
    5000
}

fn default_cooldown_secs() -> u64 {
    600 // 10 minutes
}

fn default_min_retention_days() -> u32 {
    30
}

fn default_max_retention_days() -> u32 {
    365
}

fn default_retention_days() -> u32 {
    180
}

fn default_error_message_max_len() -> usize {
    500
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_records_per_run: default_max_records_per_run(),
            cooldown_secs: default_cooldown_secs(),
            min_retention_days: default_min_retention_days(),
            max_retention_days: default_max_retention_days(),
            default_retention_days: default_retention_days(),
            error_message_max_len: default_error_message_max_len(),
        }
    }
}

impl CleanupConfig {
    pub fn cooldown(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            min_days: self.min_retention_days,
            max_days: self.max_retention_days,
            default_days: self.default_retention_days,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_records_per_run == 0 {
            return Err("cleanup.max_records_per_run must be at least 1".to_string());
        }
        if self.min_retention_days == 0 {
            return Err(
                "cleanup.min_retention_days must be at least 1 so the current day is never purged"
                    .to_string(),
            );
        }
        if self.min_retention_days > self.max_retention_days {
            return Err(format!(
                "cleanup.min_retention_days {} exceeds cleanup.max_retention_days {}",
                self.min_retention_days, self.max_retention_days
            ));
        }
        if !(self.min_retention_days..=self.max_retention_days)
            .contains(&self.default_retention_days)
        {
            return Err(format!(
                "cleanup.default_retention_days {} must be within [{}, {}]",
                self.default_retention_days, self.min_retention_days, self.max_retention_days
            ));
        }
        Ok(())
    }
}

/// Reconciliation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_limit")]
    pub default_limit: u32,
    #[serde(default = "default_reconcile_max_limit")]
    pub max_limit: u32,
    /// Tag written to `invalidation_reason`.
    #[serde(default = "default_invalidation_reason")]
    pub invalidation_reason: String,
}

fn default_reconcile_limit() -> u32 {
    5000
}

fn default_reconcile_max_limit() -> u32 {
    10000
}

fn default_invalidation_reason() -> String {
    "storage_missing".to_string()
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            default_limit: default_reconcile_limit(),
            max_limit: default_reconcile_max_limit(),
            invalidation_reason: default_invalidation_reason(),
        }
    }
}

impl ReconcileConfig {
    pub fn limits(&self) -> ReconcileLimits {
        ReconcileLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_limit == 0 {
            return Err("reconcile.max_limit must be at least 1".to_string());
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(format!(
                "reconcile.default_limit {} must be within [1, {}]",
                self.default_limit, self.max_limit
            ));
        }
        if self.invalidation_reason.trim().is_empty() {
            return Err("reconcile.invalidation_reason cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Job execution log settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_prune_retention_days")]
    pub prune_default_retention_days: u32,
    #[serde(default = "default_prune_min_retention_days")]
    pub prune_min_retention_days: u32,
    #[serde(default = "default_prune_max_retention_days")]
    pub prune_max_retention_days: u32,
    /// Default look-back window for job listings, in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_max_window_hours")]
    pub max_window_hours: u32,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
    #[serde(default = "default_max_recent_limit")]
    pub max_recent_limit: u32,
}

fn default_prune_retention_days() -> u32 {
    90
}

fn default_prune_min_retention_days() -> u32 {
    7
}

fn default_prune_max_retention_days() -> u32 {
    365
}

fn default_window_hours() -> u32 {
    24
}

fn default_max_window_hours() -> u32 {
    168 // 7 days
}

fn default_recent_limit() -> u32 {
    100
}

fn default_max_recent_limit() -> u32 {
    500
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            prune_default_retention_days: default_prune_retention_days(),
            prune_min_retention_days: default_prune_min_retention_days(),
            prune_max_retention_days: default_prune_max_retention_days(),
            window_hours: default_window_hours(),
            max_window_hours: default_max_window_hours(),
            recent_limit: default_recent_limit(),
            max_recent_limit: default_max_recent_limit(),
        }
    }
}

impl JobsConfig {
    pub fn prune_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            min_days: self.prune_min_retention_days,
            max_days: self.prune_max_retention_days,
            default_days: self.prune_default_retention_days,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let policy = self.prune_policy();
        if policy.min_days == 0 || policy.min_days > policy.max_days {
            return Err(format!(
                "jobs.prune_min_retention_days {} must be within [1, {}]",
                policy.min_days, policy.max_days
            ));
        }
        if policy.resolve(None).is_err() {
            return Err(format!(
                "jobs.prune_default_retention_days {} must be within [{}, {}]",
                policy.default_days, policy.min_days, policy.max_days
            ));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl AppConfig {
    /// Create a configuration suitable for tests.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.cleanup.validate()?;
        self.reconcile.validate()?;
        self.jobs.validate()?;
        Ok(())
    }
}
