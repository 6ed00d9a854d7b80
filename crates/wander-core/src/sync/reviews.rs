//! Delta sync engine for reviews, the attraction-scoped dependent entity.
//!
//! Two paths: a bulk pass piggybacking on the primary sync, and a narrow
//! per-attraction path driven by detail views opening. The per-attraction
//! path is bounded by a staleness window so UI display events cannot turn
//! into a stream of network calls. Unlike the primary engine this one never
//! truncates on delta passes - partially refreshed visibility is an
//! acceptable intermediate state for reviews.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{load_watermark, store_watermark, SyncResult, REVIEWS_WATERMARK_KEY};
use crate::api::CatalogApi;
use crate::db::{MetaStore, ReviewStore};
use crate::models::{AttractionId, NewReview, Reaction, RemoteReview, Review, ReviewId};
use crate::util::unix_timestamp_now;

/// Tuning for the review sync paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSyncConfig {
    /// Minimum interval between per-attraction refreshes
    pub staleness_window: Duration,
    /// Maximum IDs per local-state lookup; `SQLite` caps bind parameters
    /// per statement, so batches are chunked on the caller side
    pub state_chunk_size: usize,
}

impl Default for ReviewSyncConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(5 * 60),
            state_chunk_size: 500,
        }
    }
}

/// Keeps cached reviews fresh, preserving the locally-owned per-row state.
pub struct ReviewSyncEngine {
    api: Arc<dyn CatalogApi>,
    reviews: Arc<dyn ReviewStore>,
    meta: Arc<dyn MetaStore>,
    config: ReviewSyncConfig,
}

fn watermark_key(attraction_id: &AttractionId) -> String {
    format!("sync.reviews.{attraction_id}.watermark")
}

fn stamp_key(attraction_id: &AttractionId) -> String {
    format!("sync.reviews.{attraction_id}.last_sync")
}

impl ReviewSyncEngine {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        reviews: Arc<dyn ReviewStore>,
        meta: Arc<dyn MetaStore>,
    ) -> Self {
        Self {
            api,
            reviews,
            meta,
            config: ReviewSyncConfig::default(),
        }
    }

    /// Override the default tuning
    #[must_use]
    pub fn with_config(mut self, config: ReviewSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Bulk pass, invoked once per primary sync.
    ///
    /// With an empty table the whole set is fetched and installed
    /// wholesale; otherwise a global delta upserts only changed rows.
    /// Returns the number of rows written.
    pub async fn perform_bulk_sync(&self) -> SyncResult<usize> {
        if self.reviews.count()? == 0 {
            let batch = self.api.fetch_reviews(None).await?;
            let max_updated: Option<DateTime<Utc>> =
                batch.iter().map(|row| row.updated_at).max();

            let rows: Vec<Review> = batch
                .into_iter()
                .map(|remote| remote.into_local(None))
                .collect();
            self.reviews.replace_all(&rows)?;

            store_watermark(
                self.meta.as_ref(),
                REVIEWS_WATERMARK_KEY,
                &max_updated.unwrap_or_else(Utc::now),
            )?;
            tracing::info!("Review bootstrap installed {} rows", rows.len());
            return Ok(rows.len());
        }

        let since = load_watermark(self.meta.as_ref(), REVIEWS_WATERMARK_KEY)?;
        let batch = self.api.fetch_reviews(since).await?;
        let max_updated = batch.iter().map(|row| row.updated_at).max();

        let written = self.merge_batch(batch)?;

        let candidate = max_updated.unwrap_or_else(Utc::now);
        let new_watermark = since.map_or(candidate, |old| old.max(candidate));
        store_watermark(self.meta.as_ref(), REVIEWS_WATERMARK_KEY, &new_watermark)?;

        tracing::debug!("Review delta upserted {written} rows");
        Ok(written)
    }

    /// Narrow path for a detail view about to display an attraction's
    /// reviews. A no-op (`false`) inside the staleness window.
    pub async fn sync_for_attraction(&self, attraction_id: &AttractionId) -> SyncResult<bool> {
        if !self.staleness_elapsed(attraction_id)? {
            tracing::debug!("Reviews for {attraction_id} are fresh, skipping fetch");
            return Ok(false);
        }

        self.refresh(attraction_id).await?;
        Ok(true)
    }

    /// User-initiated refresh: bypasses the staleness window unconditionally.
    pub async fn force_refresh(&self, attraction_id: &AttractionId) -> SyncResult<()> {
        self.refresh(attraction_id).await
    }

    /// Submit a review and write it through to the cache as the viewer's
    /// own. Auth failures surface as a session-expired result so the shell
    /// can prompt re-authentication without discarding the draft.
    pub async fn submit_review(&self, new: &NewReview) -> SyncResult<Review> {
        let created = self.api.submit_review(new).await?;

        let mut row = created.into_local(None);
        row.is_mine = true;
        self.reviews.upsert(&row)?;
        Ok(row)
    }

    /// Record the viewer's reaction remotely, then on the cached row.
    pub async fn set_reaction(
        &self,
        review_id: &ReviewId,
        reaction: Option<Reaction>,
    ) -> SyncResult<()> {
        self.api.set_reaction(review_id, reaction).await?;
        self.reviews.set_reaction(review_id, reaction)?;
        Ok(())
    }

    async fn refresh(&self, attraction_id: &AttractionId) -> SyncResult<()> {
        let key = watermark_key(attraction_id);
        let since = load_watermark(self.meta.as_ref(), &key)?;

        let batch = self.api.fetch_reviews_for(attraction_id, since).await?;
        let max_updated = batch.iter().map(|row| row.updated_at).max();

        let written = self.merge_batch(batch)?;
        tracing::debug!("Refreshed {written} reviews for {attraction_id}");

        if let Some(max_updated) = max_updated {
            let new_watermark = since.map_or(max_updated, |old| old.max(max_updated));
            store_watermark(self.meta.as_ref(), &key, &new_watermark)?;
        }

        // An empty delta still advances the stamp so reopening the view
        // stays local until the window elapses again
        self.meta.set(
            &stamp_key(attraction_id),
            &unix_timestamp_now().to_string(),
        )?;

        Ok(())
    }

    /// Merge incoming rows against the locally-known per-id state, looked
    /// up in chunks.
    fn merge_batch(&self, batch: Vec<RemoteReview>) -> SyncResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let ids: Vec<ReviewId> = batch.iter().map(|row| row.id).collect();
        let mut local: HashMap<ReviewId, _> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.state_chunk_size) {
            local.extend(self.reviews.local_states(chunk)?);
        }

        let written = batch.len();
        for remote in batch {
            let state = local.get(&remote.id);
            let row = remote.into_local(state);
            self.reviews.upsert(&row)?;
        }

        Ok(written)
    }

    fn staleness_elapsed(&self, attraction_id: &AttractionId) -> SyncResult<bool> {
        let Some(raw) = self.meta.get(&stamp_key(attraction_id))? else {
            return Ok(true);
        };
        let Ok(stamp) = raw.parse::<i64>() else {
            return Ok(true);
        };

        let window = i64::try_from(self.config.staleness_window.as_secs()).unwrap_or(i64::MAX);
        Ok(unix_timestamp_now().saturating_sub(stamp) >= window)
    }
}
