//! End-to-end sync scenarios over the mock backend and a real local cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use wander_core::api::MockCatalogApi;
use wander_core::db::{AttractionStore, Database, MetaStore, ReviewStore};
use wander_core::models::{AttractionId, RemoteAttraction, RemoteReview, ReviewStatus, Tombstone};
use wander_core::net::ReachabilityMonitor;
use wander_core::sync::{
    AttractionSyncEngine, OrchestratorConfig, ReviewSyncEngine, SyncOrchestrator, SyncReport,
    ATTRACTIONS_WATERMARK_KEY,
};

struct Harness {
    api: Arc<MockCatalogApi>,
    db: Database,
    engine: AttractionSyncEngine,
}

fn harness() -> Harness {
    let api = Arc::new(MockCatalogApi::new());
    let db = Database::open_in_memory().unwrap();
    let reviews = Arc::new(ReviewSyncEngine::new(
        api.clone(),
        Arc::new(db.reviews()),
        Arc::new(db.meta()),
    ));
    let engine = AttractionSyncEngine::new(
        api.clone(),
        Arc::new(db.attractions()),
        Arc::new(db.meta()),
        reviews,
    );
    Harness { api, db, engine }
}

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn remote(id: AttractionId, name: &str, updated_at: DateTime<Utc>) -> RemoteAttraction {
    RemoteAttraction {
        id,
        name: name.to_string(),
        description: "somewhere worth walking to".to_string(),
        category: "viewpoint".to_string(),
        latitude: 54.6,
        longitude: -5.9,
        image_url: None,
        updated_at,
        is_published: true,
    }
}

fn remote_review(attraction_id: AttractionId, body: &str, updated_at: DateTime<Utc>) -> RemoteReview {
    RemoteReview {
        id: wander_core::models::ReviewId::new(),
        attraction_id,
        author_id: "user-1".to_string(),
        author_name: Some("Ada".to_string()),
        rating: 5,
        body: body.to_string(),
        status: ReviewStatus::Approved,
        likes: 0,
        dislikes: 0,
        updated_at,
    }
}

fn stored_watermark(db: &Database) -> DateTime<Utc> {
    let raw = db.meta().get(ATTRACTIONS_WATERMARK_KEY).unwrap().unwrap();
    DateTime::parse_from_rfc3339(&raw).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn first_run_populates_an_empty_cache() {
    let h = harness();
    h.api.set_attractions(vec![
        remote(AttractionId::new(), "Old Lighthouse", ts(1, 10)),
        remote(AttractionId::new(), "Harbour Market", ts(1, 11)),
        remote(AttractionId::new(), "Clock Tower", ts(1, 12)),
    ]);

    let report = h.engine.perform_sync().await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            added: 3,
            updated: 0,
            deleted: 0
        }
    );
    assert_eq!(h.db.attractions().count().unwrap(), 3);
}

#[tokio::test]
async fn repeated_sync_with_no_server_changes_reports_zeroes() {
    let h = harness();
    h.api
        .set_attractions(vec![remote(AttractionId::new(), "Old Lighthouse", ts(1, 10))]);

    h.engine.perform_sync().await.unwrap();
    let second = h.engine.perform_sync().await.unwrap();
    assert_eq!(second, SyncReport::default());
}

#[tokio::test]
async fn favorite_survives_a_server_side_update() {
    let h = harness();
    let id = AttractionId::new();
    h.api.set_attractions(vec![remote(id, "A", ts(1, 10))]);
    h.engine.perform_sync().await.unwrap();

    h.db.attractions().set_favorite(&id, true).unwrap();

    h.api.set_attractions(vec![remote(id, "B", ts(2, 10))]);
    let report = h.engine.perform_sync().await.unwrap();
    assert_eq!(report.updated, 1);

    let row = h.db.attractions().get(&id).unwrap().unwrap();
    assert_eq!(row.name, "B");
    assert!(row.is_favorite);
}

#[tokio::test]
async fn tombstone_wins_even_when_the_record_also_appears_updated() {
    let h = harness();
    let id = AttractionId::new();
    h.api.set_attractions(vec![remote(id, "Doomed", ts(1, 10))]);
    h.engine.perform_sync().await.unwrap();

    // The same pass sees an update and a deletion for the record
    h.api.set_attractions(vec![remote(id, "Doomed v2", ts(2, 10))]);
    h.api.set_tombstones(vec![Tombstone {
        entity_type: "attraction".to_string(),
        entity_id: id.to_string(),
        action: "delete".to_string(),
        deleted_at: ts(2, 11),
    }]);

    let report = h.engine.perform_sync().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(h.db.attractions().get(&id).unwrap().is_none());
}

#[tokio::test]
async fn tombstones_for_other_entity_types_are_ignored() {
    let h = harness();
    let id = AttractionId::new();
    h.api.set_attractions(vec![remote(id, "Sturdy", ts(1, 10))]);
    h.engine.perform_sync().await.unwrap();

    h.api.set_tombstones(vec![Tombstone {
        entity_type: "review".to_string(),
        entity_id: id.to_string(),
        action: "delete".to_string(),
        deleted_at: ts(2, 10),
    }]);

    let report = h.engine.perform_sync().await.unwrap();
    assert_eq!(report.deleted, 0);
    assert!(h.db.attractions().get(&id).unwrap().is_some());
}

#[tokio::test]
async fn watermark_never_regresses_and_advances_on_empty_responses() {
    let h = harness();
    h.api
        .set_attractions(vec![remote(AttractionId::new(), "A", ts(1, 10))]);

    h.engine.perform_sync().await.unwrap();
    let first = stored_watermark(&h.db);
    assert_eq!(first, ts(1, 10));

    // Nothing changed server-side; the watermark still moves forward so
    // the next delta has a valid starting point
    h.engine.perform_sync().await.unwrap();
    let second = stored_watermark(&h.db);
    assert!(second >= first);

    h.engine.perform_sync().await.unwrap();
    let third = stored_watermark(&h.db);
    assert!(third >= second);
}

#[tokio::test]
async fn primary_sync_carries_reviews_along() {
    let h = harness();
    let attraction = AttractionId::new();
    h.api
        .set_attractions(vec![remote(attraction, "Reviewed", ts(1, 10))]);
    h.api
        .set_reviews(vec![remote_review(attraction, "Lovely spot", ts(1, 9))]);

    h.engine.perform_sync().await.unwrap();
    assert_eq!(h.db.reviews().count().unwrap(), 1);
    assert_eq!(h.db.reviews().for_attraction(&attraction).unwrap().len(), 1);
}

#[tokio::test]
async fn review_sync_failure_does_not_fail_the_primary_pass() {
    let h = harness();
    h.api
        .set_attractions(vec![remote(AttractionId::new(), "A", ts(1, 10))]);
    h.api.set_reviews_unavailable(true);

    let report = h.engine.perform_sync().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(h.db.reviews().count().unwrap(), 0);
}

#[tokio::test]
async fn orchestrated_sync_publishes_progress_and_result() {
    let h = harness();
    h.api
        .set_attractions(vec![remote(AttractionId::new(), "A", ts(1, 10))]);

    let reachability = Arc::new(ReachabilityMonitor::new(true));
    let orchestrator = SyncOrchestrator::new(
        Arc::new(h.engine),
        reachability,
        OrchestratorConfig {
            status_reset_after: Duration::from_millis(20),
        },
    );

    let mut status = orchestrator.subscribe();
    let report = orchestrator.sync().await.unwrap();
    assert_eq!(report.added, 1);

    // The subscriber observed the transition into a terminal state
    assert!(status.has_changed().unwrap());
    status.borrow_and_update();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        *orchestrator.subscribe().borrow(),
        wander_core::sync::SyncStatus::Idle
    );
}
