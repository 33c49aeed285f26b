//! Storage reconciliation behaviour against a real SQLite store.

mod common;

use common::{TEST_NOW, TestServer, seed_missing, seed_project, seed_resources};
use custodian_core::job::RECONCILE_JOB_ID;
use custodian_core::reconcile::ScopeKind;
use custodian_core::{ReconcileRequest, StorageState};
use custodian_metadata::MetadataError;
use custodian_metadata::models::TrackedResourceRow;
use custodian_metadata::repos::{AuditQuery, TrackedTable};
use custodian_server::ApiError;
use time::Duration;
use uuid::Uuid;

fn dry_run() -> ReconcileRequest {
    ReconcileRequest {
        scope: ScopeKind::All,
        project_id: None,
        dry_run: true,
        limit: None,
        confirm: false,
    }
}

fn execute(limit: u32) -> ReconcileRequest {
    ReconcileRequest {
        dry_run: false,
        confirm: true,
        limit: Some(limit),
        ..dry_run()
    }
}

async fn executions(server: &TestServer) -> usize {
    server
        .metadata()
        .list_job_executions(TEST_NOW - Duration::days(1), 500)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_missing_resources_converge_in_batches() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    let ids = seed_missing(metadata.as_ref(), project.id, 3, TEST_NOW).await;

    let report = engine.run(&dry_run(), None).await.unwrap();
    assert_eq!(report.eligible_count, 3);
    assert_eq!(report.invalidated_count, 0);
    assert!(report.execution_id.is_none());

    let report = engine.run(&execute(2), Some("ops")).await.unwrap();
    assert_eq!(report.invalidated_count, 2);
    assert!(report.truncated);
    assert!(report.execution_id.is_some());

    // Oldest rows go first.
    let first = metadata
        .get_tracked_resource(TrackedTable::InputFiles, ids[0])
        .await
        .unwrap()
        .unwrap();
    let last = metadata
        .get_tracked_resource(TrackedTable::InputFiles, ids[2])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.storage_state, "invalidated");
    assert_eq!(first.invalidation_reason.as_deref(), Some("storage_missing"));
    assert_eq!(first.invalidated_at, Some(TEST_NOW));
    assert_eq!(last.storage_state, "missing");

    let report = engine.run(&execute(2), Some("ops")).await.unwrap();
    assert_eq!(report.invalidated_count, 1);
    assert!(!report.truncated);

    let report = engine.run(&dry_run(), None).await.unwrap();
    assert_eq!(report.eligible_count, 0);
}

#[tokio::test]
async fn test_execute_is_idempotent() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), project.id, 4, TEST_NOW).await;

    let first = engine.run(&execute(100), None).await.unwrap();
    assert_eq!(first.invalidated_count, 4);
    assert_eq!(executions(&server).await, 1);

    let second = engine.run(&execute(100), None).await.unwrap();
    assert_eq!(second.eligible_count, 0);
    assert_eq!(second.invalidated_count, 0);
    assert!(!second.truncated);
    // Nothing to do: no execution row, no audit event.
    assert!(second.execution_id.is_none());
    assert_eq!(executions(&server).await, 1);
}

#[tokio::test]
async fn test_limit_boundaries() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), project.id, 3, TEST_NOW).await;

    let zero = engine.run(&execute(0), None).await;
    assert!(matches!(zero, Err(ApiError::Validation(_))));

    let over = engine.run(&execute(10_001), None).await;
    assert!(matches!(over, Err(ApiError::Validation(_))));
    assert_eq!(executions(&server).await, 0);

    let one_less = engine
        .run(
            &ReconcileRequest {
                limit: Some(2),
                ..dry_run()
            },
            None,
        )
        .await
        .unwrap();
    assert!(one_less.truncated);

    let exact = engine.run(&execute(3), None).await.unwrap();
    assert_eq!(exact.invalidated_count, 3);
    assert!(!exact.truncated);
}

#[tokio::test]
async fn test_execute_requires_confirm_before_database_access() {
    let server = TestServer::new().await;
    let engine = server.state.reconcile_engine();

    // Even with the schema gone the request is rejected as invalid input first.
    sqlx::query("DROP TABLE product_files")
        .execute(server.pool())
        .await
        .unwrap();

    let unconfirmed = ReconcileRequest {
        dry_run: false,
        confirm: false,
        ..dry_run()
    };
    assert!(matches!(
        engine.run(&unconfirmed, None).await,
        Err(ApiError::Validation(_))
    ));

    let no_project = ReconcileRequest {
        scope: ScopeKind::Project,
        ..dry_run()
    };
    assert!(matches!(
        engine.run(&no_project, None).await,
        Err(ApiError::Validation(_))
    ));
}

#[tokio::test]
async fn test_eligibility_predicate() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();
    let project = seed_project(metadata.as_ref(), TEST_NOW).await;

    seed_resources(
        metadata.as_ref(),
        TrackedTable::InputFiles,
        project.id,
        StorageState::Present,
        2,
        TEST_NOW,
    )
    .await;
    seed_resources(
        metadata.as_ref(),
        TrackedTable::ProductFiles,
        project.id,
        StorageState::Invalidated,
        2,
        TEST_NOW,
    )
    .await;

    let mut inactive = TrackedResourceRow::present(project.id, TEST_NOW);
    inactive.storage_state = "missing".to_string();
    inactive.is_active = false;
    metadata
        .create_tracked_resource(TrackedTable::InputFiles, &inactive)
        .await
        .unwrap();

    let mut archived = TrackedResourceRow::present(project.id, TEST_NOW);
    archived.storage_state = "missing".to_string();
    archived.is_archived = true;
    metadata
        .create_tracked_resource(TrackedTable::ProductFiles, &archived)
        .await
        .unwrap();

    seed_resources(
        metadata.as_ref(),
        TrackedTable::ProductFiles,
        project.id,
        StorageState::Missing,
        1,
        TEST_NOW,
    )
    .await;

    let report = engine.run(&dry_run(), None).await.unwrap();
    assert_eq!(report.eligible_count, 1);
    let products = report
        .tables
        .iter()
        .find(|t| t.table == TrackedTable::ProductFiles)
        .unwrap();
    assert_eq!(products.eligible, 1);

    let stats = engine.stats(Some(project.id)).await.unwrap();
    let products = stats
        .iter()
        .find(|s| s.table == TrackedTable::ProductFiles)
        .unwrap();
    assert_eq!(products.missing_active, 1);
    assert_eq!(products.invalidated, 2);
}

#[tokio::test]
async fn test_project_scope_and_breakdown() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let a = seed_project(metadata.as_ref(), TEST_NOW).await;
    let b = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), a.id, 2, TEST_NOW).await;
    seed_missing(metadata.as_ref(), b.id, 3, TEST_NOW).await;

    let overview = engine.run(&dry_run(), None).await.unwrap();
    let breakdown = overview.by_project.unwrap();
    assert_eq!(breakdown.len(), 2);
    assert_eq!(breakdown[0].project_id, b.id);
    assert_eq!(breakdown[0].count, 3);

    let scoped = ReconcileRequest {
        scope: ScopeKind::Project,
        project_id: Some(a.id),
        ..execute(100)
    };
    let report = engine.run(&scoped, Some("ops")).await.unwrap();
    assert_eq!(report.invalidated_count, 2);
    assert!(report.by_project.is_none());

    let remaining = engine.run(&dry_run(), None).await.unwrap();
    assert_eq!(remaining.eligible_count, 3);

    let events = metadata
        .list_audit_events(&AuditQuery {
            project_id: Some(a.id),
            action_type: Some("storage_reconcile".to_string()),
            limit: 10,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor_id.as_deref(), Some("ops"));

    let unknown = ReconcileRequest {
        scope: ScopeKind::Project,
        project_id: Some(Uuid::new_v4()),
        ..dry_run()
    };
    assert!(matches!(
        engine.run(&unknown, None).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_execution_and_audit_recorded() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), project.id, 2, TEST_NOW).await;

    let report = engine.run(&execute(10), None).await.unwrap();
    let execution = metadata
        .get_job_execution(report.execution_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.job_id, RECONCILE_JOB_ID);
    assert_eq!(execution.status, "success");
    let summary: serde_json::Value =
        serde_json::from_str(execution.result_summary.as_deref().unwrap()).unwrap();
    assert_eq!(summary["invalidated_count"], 2);

    let events = metadata
        .list_audit_events(&AuditQuery {
            action_type: Some("storage_reconcile".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    // Global scope is not attributed to a project.
    assert!(events[0].project_id.is_none());
    assert_eq!(events[0].metadata().unwrap()["actor"], "system");
}

#[tokio::test]
async fn test_invalidated_is_terminal() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    let ids = seed_missing(metadata.as_ref(), project.id, 1, TEST_NOW).await;
    engine.run(&execute(10), None).await.unwrap();

    for next in [StorageState::Present, StorageState::Missing] {
        let err = metadata
            .set_storage_state(TrackedTable::InputFiles, ids[0], next, TEST_NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidStateTransition { .. }));
    }

    // A later pass leaves the stamped row alone.
    server.clock.advance(Duration::hours(1));
    engine.run(&execute(10), None).await.unwrap();
    let row = metadata
        .get_tracked_resource(TrackedTable::InputFiles, ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.storage_state, "invalidated");
    assert_eq!(row.invalidated_at, Some(TEST_NOW));
}

#[tokio::test]
async fn test_missing_schema_fails_closed() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), project.id, 2, TEST_NOW).await;

    sqlx::query("DROP TABLE product_files")
        .execute(server.pool())
        .await
        .unwrap();

    for request in [dry_run(), execute(10)] {
        let err = engine.run(&request, None).await.unwrap_err();
        assert!(matches!(err, ApiError::SchemaMissing(ref name) if name.contains("product_files")));
    }
    assert_eq!(executions(&server).await, 0);

    // Nothing was invalidated behind the refusal.
    let eligible = metadata
        .count_reconcile_eligible(TrackedTable::InputFiles, None)
        .await
        .unwrap();
    assert_eq!(eligible, 2);
}

#[tokio::test]
async fn test_limit_applies_per_table() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    seed_missing(metadata.as_ref(), project.id, 2, TEST_NOW).await;
    seed_resources(
        metadata.as_ref(),
        TrackedTable::ProductFiles,
        project.id,
        StorageState::Missing,
        1,
        TEST_NOW,
    )
    .await;

    // Three eligible rows at limit 2, but no single table exceeds it.
    let preview = engine
        .run(
            &ReconcileRequest {
                limit: Some(2),
                ..dry_run()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(preview.eligible_count, 3);
    assert!(!preview.truncated);

    let report = engine.run(&execute(2), None).await.unwrap();
    assert_eq!(report.eligible_count, 3);
    assert_eq!(report.invalidated_count, 3);
    assert!(!report.truncated);

    seed_missing(metadata.as_ref(), project.id, 3, TEST_NOW).await;
    let report = engine.run(&execute(2), None).await.unwrap();
    assert_eq!(report.invalidated_count, 2);
    assert!(report.truncated);

    let execution = metadata
        .get_job_execution(report.execution_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let summary: serde_json::Value =
        serde_json::from_str(execution.result_summary.as_deref().unwrap()).unwrap();
    assert_eq!(summary["truncated"], true);
    assert_eq!(summary["tables"][0]["table"], "input_files");
    assert_eq!(summary["tables"][0]["eligible"], 3);
    assert_eq!(summary["tables"][0]["invalidated"], 2);
}

#[tokio::test]
async fn test_audit_failure_leaves_rows_missing() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    let ids = seed_missing(metadata.as_ref(), project.id, 2, TEST_NOW).await;

    sqlx::query(
        "CREATE TRIGGER block_audit_insert BEFORE INSERT ON audit_events \
         BEGIN SELECT RAISE(ABORT, 'audit down'); END",
    )
    .execute(server.pool())
    .await
    .unwrap();

    match engine.run(&execute(10), Some("ops")).await.unwrap_err() {
        ApiError::AuditWriteFailed { code, message } => {
            assert!(code.is_some());
            assert!(message.contains("audit down"));
        }
        other => panic!("expected AuditWriteFailed, got {other:?}"),
    }

    for id in ids {
        let row = metadata
            .get_tracked_resource(TrackedTable::InputFiles, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.storage_state, "missing");
        assert!(row.invalidated_at.is_none());
    }

    let runs = metadata
        .list_job_executions(TEST_NOW - Duration::days(1), 10)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_id, RECONCILE_JOB_ID);
    assert_eq!(runs[0].status, "failed");
    assert!(runs[0].error_message.as_deref().unwrap().contains("audit down"));
}

#[tokio::test]
async fn test_execution_closes_with_the_invalidations() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let engine = server.state.reconcile_engine();

    let project = seed_project(metadata.as_ref(), TEST_NOW).await;
    let ids = seed_missing(metadata.as_ref(), project.id, 2, TEST_NOW).await;

    // Closing the run as `success` fails after the rows were updated.
    sqlx::query(
        "CREATE TRIGGER block_success BEFORE UPDATE ON admin_job_executions \
         WHEN NEW.status = 'success' \
         BEGIN SELECT RAISE(ABORT, 'ledger down'); END",
    )
    .execute(server.pool())
    .await
    .unwrap();

    let err = engine.run(&execute(10), Some("ops")).await.unwrap_err();
    assert!(matches!(err, ApiError::Internal(_)));

    // Nothing committed: rows, audit trail and the run agree.
    let row = metadata
        .get_tracked_resource(TrackedTable::InputFiles, ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.storage_state, "missing");
    let events = metadata
        .list_audit_events(&AuditQuery {
            action_type: Some("storage_reconcile".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(events.is_empty());
    let runs = metadata
        .list_job_executions(TEST_NOW - Duration::days(1), 10)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");

    sqlx::query("DROP TRIGGER block_success")
        .execute(server.pool())
        .await
        .unwrap();
    let report = engine.run(&execute(10), Some("ops")).await.unwrap();
    assert_eq!(report.invalidated_count, 2);
    let execution = metadata
        .get_job_execution(report.execution_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, "success");
}
