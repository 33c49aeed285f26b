//! Application state shared across handlers.

use crate::cleanup::CleanupRunner;
use crate::lifecycle::LifecycleService;
use crate::ratelimit::RateLimiter;
use crate::reconcile::ReconcileEngine;
use crate::tracker::JobTracker;
use custodian_core::config::AppConfig;
use custodian_core::{Clock, LogOnce, SystemClock};
use custodian_metadata::MetadataStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Record store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Time source for every timestamp the engines write.
    pub clock: Arc<dyn Clock>,
    /// Process-wide "already warned" registry.
    pub log_once: Arc<LogOnce>,
}

impl AppState {
    /// Create application state using the system clock.
    pub fn new(config: AppConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            clock: Arc::new(SystemClock),
            log_once: Arc::new(LogOnce::new()),
        }
    }

    /// Replace the time source (tests drive a `FixedClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tracker(&self) -> JobTracker {
        JobTracker::new(
            self.metadata.clone(),
            self.clock.clone(),
            self.config.cleanup.error_message_max_len,
        )
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.metadata.clone(),
            self.clock.clone(),
            self.config.cleanup.cooldown(),
        )
    }

    pub fn reconcile_engine(&self) -> ReconcileEngine {
        ReconcileEngine::new(
            self.metadata.clone(),
            self.tracker(),
            self.log_once.clone(),
            self.config.reconcile.clone(),
        )
    }

    pub fn cleanup_runner(&self) -> CleanupRunner {
        CleanupRunner::new(
            self.metadata.clone(),
            self.tracker(),
            self.rate_limiter(),
            self.log_once.clone(),
            self.config.cleanup.clone(),
        )
    }

    pub fn lifecycle(&self) -> LifecycleService {
        LifecycleService::new(self.metadata.clone(), self.clock.clone())
    }
}
