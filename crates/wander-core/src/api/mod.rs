//! Remote API client - typed access to the PostgREST-style data backend

mod mock;
mod postgrest;

pub use mock::MockCatalogApi;
pub use postgrest::PostgrestClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::AuthError;
use crate::models::{
    AttractionId, NewReview, Reaction, RemoteAttraction, RemoteReview, ReviewId, Tombstone,
};
use crate::net::Retryable;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Session expired. Please sign in again.")]
    SessionExpired,
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Auth error: {0}")]
    Auth(AuthError),
    #[error("Unexpected response payload: {0}")]
    InvalidResponse(String),
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::SessionExpired => Self::SessionExpired,
            AuthError::NotSignedIn => Self::NotSignedIn,
            other => Self::Auth(other),
        }
    }
}

impl Retryable for ApiError {
    fn is_transient(&self) -> bool {
        match self {
            // Timeouts and connect-level failures (DNS, TLS, refused)
            Self::Http(error) => error.is_timeout() || error.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Typed operations against the catalog backend.
///
/// The sync engines depend only on this interface; tests substitute
/// [`MockCatalogApi`].
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Published attractions, optionally restricted to rows updated after
    /// `since` (delta fetch). `None` fetches the entire catalog.
    async fn fetch_attractions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteAttraction>>;

    /// Attraction tombstones deleted after `since`
    async fn fetch_tombstones(&self, since: DateTime<Utc>) -> ApiResult<Vec<Tombstone>>;

    /// All reviews, optionally restricted to rows updated after `since`
    async fn fetch_reviews(&self, since: Option<DateTime<Utc>>) -> ApiResult<Vec<RemoteReview>>;

    /// Reviews for one attraction, optionally restricted to rows updated
    /// after `since`
    async fn fetch_reviews_for(
        &self,
        attraction_id: &AttractionId,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteReview>>;

    /// Submit a new review (authenticated; never transport-retried)
    async fn submit_review(&self, review: &NewReview) -> ApiResult<RemoteReview>;

    /// Set or clear the viewer's reaction (authenticated)
    async fn set_reaction(&self, review_id: &ReviewId, reaction: Option<Reaction>)
        -> ApiResult<()>;
}
