//! Route configuration.

use crate::context::request_context_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Reconciliation
        .route(
            "/v1/admin/reconcile/storage",
            post(handlers::reconcile_storage),
        )
        .route("/v1/admin/reconcile/stats", get(handlers::reconcile_stats))
        // Cleanup jobs: GET is the dry run, POST executes one batch
        .route(
            "/v1/admin/cleanup/ghost-files",
            get(handlers::preview_ghost_cleanup).post(handlers::execute_ghost_cleanup),
        )
        .route(
            "/v1/admin/cleanup/storage-snapshots",
            get(handlers::preview_snapshot_cleanup).post(handlers::execute_snapshot_cleanup),
        )
        // Project lifecycle
        .route("/v1/admin/projects", post(handlers::create_project))
        .route(
            "/v1/admin/projects/{project_id}",
            get(handlers::get_project).delete(handlers::hard_delete_project),
        )
        .route(
            "/v1/admin/projects/{project_id}/transition",
            post(handlers::transition_project),
        )
        .route(
            "/v1/admin/projects/{project_id}/close",
            post(handlers::close_project),
        )
        // Audit ledger and job log
        .route("/v1/admin/audit", get(handlers::list_audit_events))
        .route("/v1/admin/jobs", get(handlers::jobs_overview))
        .route(
            "/v1/admin/jobs/executions",
            get(handlers::list_job_executions),
        )
        .route("/v1/admin/jobs/prune", post(handlers::prune_job_executions));

    let mut router = Router::new().merge(api_routes);

    // When enabled, this endpoint should only be reachable by the scraper.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
