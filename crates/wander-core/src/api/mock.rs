//! A mock catalog API for tests.
//!
//! Serves canned rows, applies the same `since` semantics as the real
//! backend, and counts calls per endpoint so tests can assert how often the
//! network was actually hit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ApiError, ApiResult, CatalogApi};
use crate::models::{
    AttractionId, NewReview, Reaction, RemoteAttraction, RemoteReview, ReviewId, ReviewStatus,
    Tombstone,
};

#[derive(Default)]
pub struct MockCatalogApi {
    attractions: Mutex<Vec<RemoteAttraction>>,
    tombstones: Mutex<Vec<Tombstone>>,
    reviews: Mutex<Vec<RemoteReview>>,
    submitted: Mutex<Vec<NewReview>>,
    reactions: Mutex<Vec<(ReviewId, Option<Reaction>)>>,
    response_delay: Mutex<Option<Duration>>,
    fail_next_attraction_delta: AtomicBool,
    fail_review_fetches: AtomicBool,
    fail_everything: AtomicBool,
    attraction_fetches: AtomicUsize,
    tombstone_fetches: AtomicUsize,
    review_fetches: AtomicUsize,
    review_parent_fetches: AtomicUsize,
}

impl MockCatalogApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attractions(&self, rows: Vec<RemoteAttraction>) {
        *self.attractions.lock().expect("mock lock") = rows;
    }

    pub fn set_tombstones(&self, rows: Vec<Tombstone>) {
        *self.tombstones.lock().expect("mock lock") = rows;
    }

    pub fn set_reviews(&self, rows: Vec<RemoteReview>) {
        *self.reviews.lock().expect("mock lock") = rows;
    }

    /// Fail the next delta (`since`-filtered) attraction fetch with a 503;
    /// the full-fetch fallback will then be served normally.
    pub fn fail_next_attraction_delta(&self) {
        self.fail_next_attraction_delta.store(true, Ordering::SeqCst);
    }

    /// Fail every fetch with a 503 until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_everything.store(unavailable, Ordering::SeqCst);
    }

    /// Fail only the review endpoints with a 503 until cleared
    pub fn set_reviews_unavailable(&self, unavailable: bool) {
        self.fail_review_fetches.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every call open for the given duration, so tests can observe
    /// in-flight sync state
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock().expect("mock lock") = Some(delay);
    }

    #[must_use]
    pub fn attraction_fetches(&self) -> usize {
        self.attraction_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn tombstone_fetches(&self) -> usize {
        self.tombstone_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn review_fetches(&self) -> usize {
        self.review_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn review_parent_fetches(&self) -> usize {
        self.review_parent_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn submitted_reviews(&self) -> Vec<NewReview> {
        self.submitted.lock().expect("mock lock").clone()
    }

    #[must_use]
    pub fn recorded_reactions(&self) -> Vec<(ReviewId, Option<Reaction>)> {
        self.reactions.lock().expect("mock lock").clone()
    }

    fn unavailable() -> ApiError {
        ApiError::Status {
            status: 503,
            message: "service unavailable".to_string(),
        }
    }

    async fn gate(&self) -> ApiResult<()> {
        let delay = *self.response_delay.lock().expect("mock lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_everything.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for MockCatalogApi {
    async fn fetch_attractions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteAttraction>> {
        self.attraction_fetches.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;

        if since.is_some() && self.fail_next_attraction_delta.swap(false, Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let rows = self.attractions.lock().expect("mock lock").clone();
        Ok(match since {
            Some(since) => rows
                .into_iter()
                .filter(|row| row.updated_at > since)
                .collect(),
            None => rows,
        })
    }

    async fn fetch_tombstones(&self, since: DateTime<Utc>) -> ApiResult<Vec<Tombstone>> {
        self.tombstone_fetches.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;

        Ok(self
            .tombstones
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|row| row.deleted_at > since)
            .cloned()
            .collect())
    }

    async fn fetch_reviews(&self, since: Option<DateTime<Utc>>) -> ApiResult<Vec<RemoteReview>> {
        self.review_fetches.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        if self.fail_review_fetches.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let rows = self.reviews.lock().expect("mock lock").clone();
        Ok(match since {
            Some(since) => rows
                .into_iter()
                .filter(|row| row.updated_at > since)
                .collect(),
            None => rows,
        })
    }

    async fn fetch_reviews_for(
        &self,
        attraction_id: &AttractionId,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteReview>> {
        self.review_parent_fetches.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        if self.fail_review_fetches.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        Ok(self
            .reviews
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|row| {
                row.attraction_id == *attraction_id
                    && since.map_or(true, |since| row.updated_at > since)
            })
            .cloned()
            .collect())
    }

    async fn submit_review(&self, review: &NewReview) -> ApiResult<RemoteReview> {
        self.gate().await?;
        self.submitted.lock().expect("mock lock").push(review.clone());

        let created = RemoteReview {
            id: ReviewId::new(),
            attraction_id: review.attraction_id,
            author_id: "mock-user".to_string(),
            author_name: None,
            rating: review.rating,
            body: review.body.clone(),
            status: ReviewStatus::Pending,
            likes: 0,
            dislikes: 0,
            updated_at: Utc::now(),
        };
        self.reviews.lock().expect("mock lock").push(created.clone());
        Ok(created)
    }

    async fn set_reaction(
        &self,
        review_id: &ReviewId,
        reaction: Option<Reaction>,
    ) -> ApiResult<()> {
        self.gate().await?;
        self.reactions
            .lock()
            .expect("mock lock")
            .push((*review_id, reaction));
        Ok(())
    }
}
