//! Sync module - delta sync engines and the orchestrator.
//!
//! The engines never panic past their own boundary: every operation returns
//! a structured result with a typed reason, which the orchestrator maps
//! into observable state for the presentation layer.

mod attractions;
mod orchestrator;
mod reviews;

pub use attractions::AttractionSyncEngine;
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncStatus};
pub use reviews::{ReviewSyncConfig, ReviewSyncEngine};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::ApiError;
use crate::db::MetaStore;
use crate::util::to_utc_rfc3339;

/// Watermark key for the attraction catalog
pub const ATTRACTIONS_WATERMARK_KEY: &str = "sync.attractions.watermark";
/// Watermark key for the global review delta
pub const REVIEWS_WATERMARK_KEY: &str = "sync.reviews.watermark";

/// Outcome counters for one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Categorized sync failure, safe to publish on the status channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("You are offline. Changes will sync when you reconnect.")]
    Offline,
    #[error("A sync is already in progress")]
    AlreadyRunning,
    #[error("Could not reach the server: {0}")]
    Transport(String),
    #[error("Session expired. Please sign in again.")]
    SessionExpired,
    #[error("The server rejected the request: {0}")]
    Rejected(String),
    #[error("Local store error: {0}")]
    Store(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl From<crate::error::Error> for SyncError {
    fn from(error: crate::error::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<ApiError> for SyncError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::SessionExpired | ApiError::NotSignedIn => Self::SessionExpired,
            ApiError::Http(e) => Self::Transport(e.to_string()),
            ApiError::Status { status, message } if status >= 500 => {
                Self::Transport(format!("HTTP {status}: {message}"))
            }
            ApiError::Status { status, message } => {
                Self::Rejected(format!("HTTP {status}: {message}"))
            }
            ApiError::Auth(e) => Self::Transport(e.to_string()),
            ApiError::InvalidResponse(message) => Self::Rejected(message),
        }
    }
}

/// Read a stored watermark; unparseable values are discarded so the next
/// pass degrades to a full sync instead of failing forever.
pub(crate) fn load_watermark(
    meta: &dyn MetaStore,
    key: &str,
) -> SyncResult<Option<DateTime<Utc>>> {
    let Some(raw) = meta.get(key)? else {
        return Ok(None);
    };

    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
        Err(error) => {
            tracing::warn!("Discarding unparseable watermark {key}={raw}: {error}");
            Ok(None)
        }
    }
}

/// Persist a watermark. Callers must only do this after every row mutation
/// of the pass has succeeded.
pub(crate) fn store_watermark(
    meta: &dyn MetaStore,
    key: &str,
    value: &DateTime<Utc>,
) -> SyncResult<()> {
    meta.set(key, &to_utc_rfc3339(value))?;
    Ok(())
}
