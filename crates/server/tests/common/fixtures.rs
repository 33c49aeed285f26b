//! Test fixtures for seeding projects, tracked resources and snapshots.

use custodian_core::StorageState;
use custodian_metadata::MetadataStore;
use custodian_metadata::models::{ProjectRow, StorageSnapshotRow, TrackedResourceRow};
use custodian_metadata::repos::TrackedTable;
use std::sync::atomic::{AtomicU64, Ordering};
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

/// Counter for generating unique project slugs.
static SLUG_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique project slug.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn unique_slug(prefix: &str) -> String {
    let n = SLUG_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{n}")
}

/// Create a project in `created` / `in_process`.
#[allow(dead_code)]
pub async fn seed_project(metadata: &dyn MetadataStore, now: OffsetDateTime) -> ProjectRow {
    let project = ProjectRow::new(Uuid::new_v4(), &unique_slug("project"), "Test project", now);
    metadata
        .create_project(&project)
        .await
        .expect("Failed to create project");
    project
}

/// Insert `count` resources in `state`, one second apart starting at `base`.
#[allow(dead_code)]
pub async fn seed_resources(
    metadata: &dyn MetadataStore,
    table: TrackedTable,
    project_id: Uuid,
    state: StorageState,
    count: usize,
    base: OffsetDateTime,
) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let offset = i64::try_from(i).expect("count fits in i64");
        let mut row = TrackedResourceRow::present(project_id, base + Duration::seconds(offset));
        row.storage_state = state.as_str().to_string();
        if state == StorageState::Invalidated {
            row.invalidated_at = Some(base);
            row.invalidation_reason = Some("seeded".to_string());
        }
        metadata
            .create_tracked_resource(table, &row)
            .await
            .expect("Failed to create tracked resource");
        ids.push(row.id);
    }
    ids
}

/// Insert `count` `missing` input files.
#[allow(dead_code)]
pub async fn seed_missing(
    metadata: &dyn MetadataStore,
    project_id: Uuid,
    count: usize,
    base: OffsetDateTime,
) -> Vec<Uuid> {
    seed_resources(
        metadata,
        TrackedTable::InputFiles,
        project_id,
        StorageState::Missing,
        count,
        base,
    )
    .await
}

/// Insert `count` ghost input files (object never written).
#[allow(dead_code)]
pub async fn seed_ghosts(
    metadata: &dyn MetadataStore,
    project_id: Uuid,
    count: usize,
    base: OffsetDateTime,
) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let offset = i64::try_from(i).expect("count fits in i64");
        let row = TrackedResourceRow::ghost(project_id, base + Duration::seconds(offset));
        metadata
            .create_tracked_resource(TrackedTable::InputFiles, &row)
            .await
            .expect("Failed to create ghost record");
        ids.push(row.id);
    }
    ids
}

/// Insert one snapshot per day for `days` days ending at `last_day`.
#[allow(dead_code)]
pub async fn seed_snapshots(
    metadata: &dyn MetadataStore,
    last_day: Date,
    days: u32,
    now: OffsetDateTime,
) {
    for back in 0..days {
        let day = last_day - Duration::days(i64::from(back));
        metadata
            .insert_storage_snapshot(&StorageSnapshotRow {
                day,
                total_bytes: 1024 * i64::from(back + 1),
                object_count: i64::from(back + 1),
                created_at: now,
            })
            .await
            .expect("Failed to insert snapshot");
    }
}
