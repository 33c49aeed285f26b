//! PostgreSQL integration tests using testcontainers.
//!
//! Behaviour that SQLite cannot exercise: row locks shared between
//! concurrent runs and database-level audit failures.
//! They require Docker to be running. Set SKIP_POSTGRES_TESTS=1 to skip.

mod common;

use common::{
    TEST_NOW, postgres_or_skip, run_metadata_test_both, seed_ghosts, seed_missing, seed_project,
    state_over,
};
use custodian_core::cleanup::GHOST_CLEANUP_CONFIRMATION;
use custodian_core::job::MANUAL_ADMIN_JOB_TYPE;
use custodian_core::reconcile::ScopeKind;
use custodian_core::{CleanupJob, OperationalState, ReconcileRequest};
use custodian_metadata::MetadataStore;
use custodian_metadata::models::{AuditEventRow, JobExecutionRow};
use custodian_metadata::repos::{PurgeRequest, PurgeTarget, TrackedTable};
use custodian_server::ApiError;
use std::sync::Arc;
use time::Duration;
use uuid::Uuid;

fn execute_all(limit: u32) -> ReconcileRequest {
    ReconcileRequest {
        scope: ScopeKind::All,
        project_id: None,
        dry_run: false,
        limit: Some(limit),
        confirm: true,
    }
}

#[tokio::test]
async fn test_reconcile_converges_on_both_backends() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let (state, _clock) = state_over(store.clone());
        let project = seed_project(store.as_ref(), TEST_NOW).await;
        let ids = seed_missing(store.as_ref(), project.id, 3, TEST_NOW).await;

        let engine = state.reconcile_engine();
        let first = engine.run(&execute_all(2), Some("ops")).await.unwrap();
        assert_eq!(first.invalidated_count, 2);
        assert!(first.truncated);

        let oldest = store
            .get_tracked_resource(TrackedTable::InputFiles, ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oldest.storage_state, "invalidated");
        assert_eq!(oldest.invalidated_at, Some(TEST_NOW));

        let second = engine.run(&execute_all(2), Some("ops")).await.unwrap();
        assert_eq!(second.invalidated_count, 1);
        assert!(!second.truncated);

        let third = engine.run(&execute_all(2), Some("ops")).await.unwrap();
        assert_eq!(third.eligible_count, 0);
        assert!(third.execution_id.is_none());
    })
    .await;
}

#[tokio::test]
async fn test_lifecycle_rules_on_both_backends() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let (state, clock) = state_over(store);
        let service = state.lifecycle();
        let slug = format!("pg-{}", Uuid::new_v4().simple());
        let project = service
            .create_project(Uuid::new_v4(), &slug, "Lifecycle")
            .await
            .unwrap();

        for target in [OperationalState::Uploading, OperationalState::Processing] {
            service.transition(project.id, target, None).await.unwrap();
        }
        assert!(matches!(
            service.close(project.id, "done", None).await,
            Err(ApiError::NotAllowed(_))
        ));

        service
            .transition(project.id, OperationalState::Ready, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let closed = service.close(project.id, "done", None).await.unwrap();
        assert!(!closed.noop);
        assert_eq!(closed.project.closed_at, Some(TEST_NOW + Duration::minutes(5)));

        let again = service.close(project.id, "done", None).await.unwrap();
        assert!(again.noop);

        service.hard_delete(project.id, Some("ops")).await.unwrap();
        assert!(matches!(
            service.get_project(project.id).await,
            Err(ApiError::NotFound(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_postgres_concurrent_purges_do_not_overlap() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let project = seed_project(store.as_ref(), TEST_NOW).await;
    seed_ghosts(store.as_ref(), project.id, 40, TEST_NOW).await;

    // The cooldown is advisory across processes; the row locks are not.
    let request = |execution: &JobExecutionRow| PurgeRequest {
        target: PurgeTarget::GhostFiles,
        limit: 20,
        execution_id: execution.execution_id,
        started_at: execution.started_at,
        finished_at: TEST_NOW,
        eligible_before: 40,
    };
    let audit = || {
        AuditEventRow::new(
            None,
            None,
            CleanupJob::GhostFiles.audit_action(),
            "concurrent purge",
            serde_json::json!({}),
            TEST_NOW,
        )
        .unwrap()
    };

    let mut executions = Vec::new();
    for _ in 0..2 {
        let row = JobExecutionRow::running(
            CleanupJob::GhostFiles.job_id(),
            MANUAL_ADMIN_JOB_TYPE,
            CleanupJob::GhostFiles.module(),
            TEST_NOW,
        );
        store.start_job_execution(&row).await.unwrap();
        executions.push(row);
    }

    let (first_req, second_req) = (request(&executions[0]), request(&executions[1]));
    let (first_audit, second_audit) = (audit(), audit());
    let (first, second) = futures::join!(
        store.purge(&first_req, &first_audit),
        store.purge(&second_req, &second_audit),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.deleted_count + second.deleted_count, 40);
    assert!(first.deleted_count <= 20 && second.deleted_count <= 20);
    assert_eq!(
        store
            .count_purge_eligible(&PurgeTarget::GhostFiles)
            .await
            .unwrap(),
        0
    );

    for execution in &executions {
        let row = store
            .get_job_execution(execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "success");
    }
}

#[tokio::test]
async fn test_postgres_concurrent_reconcile_runs_share_the_work() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let (state, _clock) = state_over(store.clone());
    let project = seed_project(store.as_ref(), TEST_NOW).await;
    seed_missing(store.as_ref(), project.id, 10, TEST_NOW).await;

    let (engine_a, engine_b) = (state.reconcile_engine(), state.reconcile_engine());
    let request = execute_all(5);
    let (a, b) = futures::join!(
        engine_a.run(&request, Some("a")),
        engine_b.run(&request, Some("b")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.invalidated_count + b.invalidated_count, 10);

    let stats = state.reconcile_engine().stats(Some(project.id)).await.unwrap();
    let input = stats
        .iter()
        .find(|s| s.table == TrackedTable::InputFiles)
        .unwrap();
    assert_eq!(input.missing_active, 0);
    assert_eq!(input.invalidated, 10);
}

#[tokio::test]
async fn test_postgres_hard_delete_keeps_project_when_audit_fails() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let (state, _clock) = state_over(metadata.store());
    let service = state.lifecycle();
    let project = service
        .create_project(Uuid::new_v4(), "audit-down", "Audit down")
        .await
        .unwrap();
    service.close(project.id, "retired", None).await.unwrap();

    sqlx::query(
        r#"
        CREATE FUNCTION reject_audit() RETURNS trigger LANGUAGE plpgsql AS $$
        BEGIN
            RAISE EXCEPTION 'audit down';
        END
        $$
        "#,
    )
    .execute(metadata.pool())
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_audit BEFORE INSERT ON audit_events \
         FOR EACH ROW EXECUTE FUNCTION reject_audit()",
    )
    .execute(metadata.pool())
    .await
    .unwrap();

    match service.hard_delete(project.id, Some("ops")).await {
        Err(ApiError::AuditWriteFailed { code, message }) => {
            assert_eq!(code.as_deref(), Some("P0001"));
            assert!(message.contains("audit down"));
        }
        other => panic!("expected AuditWriteFailed, got {other:?}"),
    }
    assert!(service.get_project(project.id).await.is_ok());

    // The cleanup runner fails the same way and leaves its rows alone.
    seed_ghosts(metadata.store().as_ref(), project.id, 2, TEST_NOW).await;
    let err = state
        .cleanup_runner()
        .execute(CleanupJob::GhostFiles, GHOST_CLEANUP_CONFIRMATION, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AuditWriteFailed { .. }));
    assert_eq!(
        metadata
            .store()
            .count_purge_eligible(&PurgeTarget::GhostFiles)
            .await
            .unwrap(),
        2
    );
}
