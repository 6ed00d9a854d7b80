//! Delta sync engine for the attraction catalog.
//!
//! Watermark-driven: with no watermark the entire catalog is fetched, else
//! only records with `updated_at` past the watermark plus the tombstone
//! feed. The watermark commits only after every row mutation succeeded, so
//! a crash mid-pass re-runs a superset of the same idempotent work.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{
    load_watermark, store_watermark, ReviewSyncEngine, SyncReport, SyncResult,
    ATTRACTIONS_WATERMARK_KEY,
};
use crate::api::CatalogApi;
use crate::db::{AttractionStore, MetaStore};
use crate::models::{AttractionId, RemoteAttraction, Tombstone, ENTITY_TYPE_ATTRACTION};
use crate::net::Retryable;

/// Reconciles the local attraction cache against the backend.
pub struct AttractionSyncEngine {
    api: Arc<dyn CatalogApi>,
    attractions: Arc<dyn AttractionStore>,
    meta: Arc<dyn MetaStore>,
    reviews: Arc<ReviewSyncEngine>,
}

impl AttractionSyncEngine {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        attractions: Arc<dyn AttractionStore>,
        meta: Arc<dyn MetaStore>,
        reviews: Arc<ReviewSyncEngine>,
    ) -> Self {
        Self {
            api,
            attractions,
            meta,
            reviews,
        }
    }

    /// One sync pass: delta when a watermark exists, full otherwise.
    pub async fn perform_sync(&self) -> SyncResult<SyncReport> {
        let watermark = load_watermark(self.meta.as_ref(), ATTRACTIONS_WATERMARK_KEY)?;
        tracing::info!("Attraction sync starting (watermark: {watermark:?})");

        // Snapshot favorites before any mutation; inserts are seeded from it
        let favorites = self.attractions.favorite_ids()?;

        let batch = match watermark {
            None => self.api.fetch_attractions(None).await?,
            Some(since) => match self.api.fetch_attractions(Some(since)).await {
                Ok(batch) => batch,
                Err(error) if error.is_transient() => {
                    // One-shot fallback: a flaky delta should not fail the
                    // whole pass when a full fetch may still succeed
                    tracing::warn!("Delta fetch failed ({error}); falling back to full fetch");
                    self.api.fetch_attractions(None).await?
                }
                Err(error) => return Err(error.into()),
            },
        };

        // No watermark means a first sync: nothing can have been deleted yet
        let tombstones = match watermark {
            Some(since) => self.api.fetch_tombstones(since).await?,
            None => Vec::new(),
        };

        let report = self.merge(batch, &tombstones, &favorites, watermark)?;
        tracing::info!(
            "Attraction sync finished: +{} ~{} -{}",
            report.added,
            report.updated,
            report.deleted
        );

        // Best-effort: a review sync failure never fails the primary pass
        if let Err(error) = self.reviews.perform_bulk_sync().await {
            tracing::warn!("Review bulk sync failed, continuing: {error}");
        }

        Ok(report)
    }

    /// Replace the entire local set with the server's state, preserving
    /// favorites via the snapshot, and reset the watermark to match.
    pub async fn force_full_sync(&self) -> SyncResult<SyncReport> {
        tracing::info!("Forced full attraction sync starting");
        let favorites = self.attractions.favorite_ids()?;
        let prior: HashSet<AttractionId> =
            self.attractions.list()?.iter().map(|row| row.id).collect();

        let batch = self.api.fetch_attractions(None).await?;

        let now = Utc::now();
        let mut report = SyncReport::default();
        let mut max_updated: Option<DateTime<Utc>> = None;
        let mut rows = Vec::with_capacity(batch.len());
        let mut fresh_ids = HashSet::with_capacity(batch.len());

        for remote in batch {
            max_updated = Some(max_updated.map_or(remote.updated_at, |m| m.max(remote.updated_at)));
            fresh_ids.insert(remote.id);
            if prior.contains(&remote.id) {
                report.updated += 1;
            } else {
                report.added += 1;
            }
            rows.push(remote.into_local(None, &favorites, now));
        }
        report.deleted = prior.difference(&fresh_ids).count();

        self.attractions.replace_all(&rows)?;
        store_watermark(
            self.meta.as_ref(),
            ATTRACTIONS_WATERMARK_KEY,
            &max_updated.unwrap_or(now),
        )?;

        if let Err(error) = self.reviews.perform_bulk_sync().await {
            tracing::warn!("Review bulk sync failed, continuing: {error}");
        }

        Ok(report)
    }

    /// Merge a fetched batch and tombstones into the cache, then advance
    /// the watermark.
    fn merge(
        &self,
        batch: Vec<RemoteAttraction>,
        tombstones: &[Tombstone],
        favorites: &HashSet<AttractionId>,
        watermark: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncReport> {
        let now = Utc::now();
        let mut report = SyncReport::default();
        let mut max_updated: Option<DateTime<Utc>> = None;

        for remote in batch {
            max_updated = Some(max_updated.map_or(remote.updated_at, |m| m.max(remote.updated_at)));

            let existing = self.attractions.get(&remote.id)?;
            let row = remote.into_local(existing.as_ref(), favorites, now);
            self.attractions.upsert(&row)?;

            if existing.is_some() {
                report.updated += 1;
            } else {
                report.added += 1;
            }
        }

        // Applied after the upserts: a record both updated and tombstoned
        // in the same pass ends up deleted
        for tombstone in tombstones {
            if !tombstone.targets(ENTITY_TYPE_ATTRACTION) {
                continue;
            }
            let Ok(id) = tombstone.entity_id.parse::<AttractionId>() else {
                tracing::warn!("Skipping tombstone with malformed id: {}", tombstone.entity_id);
                continue;
            };
            if self.attractions.delete(&id)? {
                report.deleted += 1;
            }
        }

        // An empty batch still advances to "now" so the next delta call has
        // a valid starting point; the clamp keeps the watermark monotonic
        // under clock skew
        let candidate = max_updated.unwrap_or(now);
        let new_watermark = watermark.map_or(candidate, |old| old.max(candidate));
        store_watermark(self.meta.as_ref(), ATTRACTIONS_WATERMARK_KEY, &new_watermark)?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockCatalogApi;
    use crate::db::Database;
    use chrono::TimeZone;

    fn engine_with(api: Arc<MockCatalogApi>, db: &Database) -> AttractionSyncEngine {
        let reviews = Arc::new(ReviewSyncEngine::new(
            api.clone(),
            Arc::new(db.reviews()),
            Arc::new(db.meta()),
        ));
        AttractionSyncEngine::new(
            api,
            Arc::new(db.attractions()),
            Arc::new(db.meta()),
            reviews,
        )
    }

    fn remote(name: &str, updated_at: DateTime<Utc>) -> RemoteAttraction {
        RemoteAttraction {
            id: AttractionId::new(),
            name: name.to_string(),
            description: "somewhere".to_string(),
            category: "museum".to_string(),
            latitude: 54.6,
            longitude: -5.9,
            image_url: None,
            updated_at,
            is_published: true,
        }
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn first_sync_fetches_everything_and_skips_tombstones() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A", ts(1)), remote("B", ts(2)), remote("C", ts(3))]);

        let db = Database::open_in_memory().unwrap();
        let engine = engine_with(api.clone(), &db);

        let report = engine.perform_sync().await.unwrap();
        assert_eq!(report, SyncReport { added: 3, updated: 0, deleted: 0 });
        assert_eq!(db.attractions().count().unwrap(), 3);
        assert_eq!(api.tombstone_fetches(), 0);
    }

    #[tokio::test]
    async fn second_sync_with_no_changes_is_a_no_op() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A", ts(1))]);

        let db = Database::open_in_memory().unwrap();
        let engine = engine_with(api.clone(), &db);

        engine.perform_sync().await.unwrap();
        let report = engine.perform_sync().await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(api.tombstone_fetches(), 1);
    }

    #[tokio::test]
    async fn transient_delta_failure_falls_back_to_full_fetch() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A", ts(1))]);

        let db = Database::open_in_memory().unwrap();
        let engine = engine_with(api.clone(), &db);
        engine.perform_sync().await.unwrap();
        assert_eq!(api.attraction_fetches(), 1);

        api.fail_next_attraction_delta();
        let report = engine.perform_sync().await.unwrap();
        // Delta attempt + fallback full fetch
        assert_eq!(api.attraction_fetches(), 3);
        // The full set re-merges as updates
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn force_full_sync_purges_rows_missing_from_server() {
        let api = Arc::new(MockCatalogApi::new());
        let kept = remote("Kept", ts(1));
        let dropped = remote("Dropped", ts(1));
        api.set_attractions(vec![kept.clone(), dropped.clone()]);

        let db = Database::open_in_memory().unwrap();
        let engine = engine_with(api.clone(), &db);
        engine.perform_sync().await.unwrap();

        db.attractions().set_favorite(&kept.id, true).unwrap();
        api.set_attractions(vec![kept.clone()]);

        let report = engine.force_full_sync().await.unwrap();
        assert_eq!(report, SyncReport { added: 0, updated: 1, deleted: 1 });
        assert!(db.attractions().get(&dropped.id).unwrap().is_none());
        // The snapshot carried the favorite through the purge+reinsert
        assert!(db.attractions().get(&kept.id).unwrap().unwrap().is_favorite);
    }
}
