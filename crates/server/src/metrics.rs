//! Prometheus metrics for the custodian server.
//!
//! Counts destructive work (rows invalidated, rows purged), job outcomes and
//! refusals. Labels carry table and job names only, never project ids.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it and
//! must be network-restricted to the scraper.

use crate::error::ApiError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Reconciliation
pub static RECONCILE_INVALIDATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "custodian_reconcile_invalidated_total",
            "Tracked resources moved to invalidated by reconciliation",
        ),
        &["table"],
    )
    .expect("metric creation failed")
});

// Cleanup
pub static CLEANUP_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "custodian_cleanup_deleted_total",
            "Rows permanently removed by cleanup jobs",
        ),
        &["job"],
    )
    .expect("metric creation failed")
});

// Job executions
pub static JOB_EXECUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "custodian_job_executions_total",
            "Finished administrative job executions by job and status",
        ),
        &["job", "status"],
    )
    .expect("metric creation failed")
});

pub static JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "custodian_job_duration_seconds",
            "Wall time of administrative job executions",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["job"],
    )
    .expect("metric creation failed")
});

pub static RATE_LIMITED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "custodian_rate_limited_total",
            "Execute requests refused by the job cooldown",
        ),
        &["job"],
    )
    .expect("metric creation failed")
});

// Audit and lifecycle
pub static AUDIT_WRITE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "custodian_audit_write_failures_total",
        "Audit inserts that failed and aborted their operation",
    )
    .expect("metric creation failed")
});

pub static LIFECYCLE_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "custodian_lifecycle_transitions_total",
            "Applied project lifecycle operations by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RECONCILE_INVALIDATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLEANUP_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_EXECUTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RATE_LIMITED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUDIT_WRITE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LIFECYCLE_TRANSITIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a finished job execution.
pub fn record_job_execution(job_id: &str, status: &str, duration_ms: i64) {
    JOB_EXECUTIONS.with_label_values(&[job_id, status]).inc();
    JOB_DURATION
        .with_label_values(&[job_id])
        .observe(duration_ms.max(0) as f64 / 1000.0);
}

/// Count an operation aborted because its audit insert failed.
pub fn record_audit_failure(error: &ApiError) {
    if matches!(error, ApiError::AuditWriteFailed { .. }) {
        AUDIT_WRITE_FAILURES.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Panics if any metric creation or registration failed
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_record_job_execution() {
        register_metrics();
        let before = JOB_EXECUTIONS
            .with_label_values(&["metrics_test_job", "success"])
            .get();
        record_job_execution("metrics_test_job", "success", 1500);
        assert_eq!(
            JOB_EXECUTIONS
                .with_label_values(&["metrics_test_job", "success"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_audit_failures_counted_where_detected() {
        let before = AUDIT_WRITE_FAILURES.get();
        let err = ApiError::from(custodian_metadata::MetadataError::AuditWrite {
            code: Some("1811".to_string()),
            message: "audit down".to_string(),
        });
        // Converting the error alone counts nothing.
        assert_eq!(AUDIT_WRITE_FAILURES.get(), before);

        record_audit_failure(&ApiError::Internal("other".to_string()));
        assert_eq!(AUDIT_WRITE_FAILURES.get(), before);

        record_audit_failure(&err);
        assert_eq!(AUDIT_WRITE_FAILURES.get(), before + 1);
    }
}
