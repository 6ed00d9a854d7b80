//! Review model - the dependent entity scoped to an attraction

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AttractionId;

/// A unique identifier for a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewId(Uuid);

impl ReviewId {
    /// Create a new unique review ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ReviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReviewId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Moderation status of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    /// Stable storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a storage/wire value, defaulting unknown values to pending
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// The current viewer's reaction to a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    /// Stable storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    /// Parse a storage value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }
}

/// A locally cached review.
///
/// `my_reaction`, `is_mine`, and `rejection_reason` are locally preserved:
/// the public read payload does not carry per-viewer reaction state, so a
/// bulk overwrite from server data must not clear them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Unique identifier
    pub id: ReviewId,
    /// Owning attraction
    pub attraction_id: AttractionId,
    /// Author's user id
    pub author_id: String,
    /// Author display name, if public
    pub author_name: Option<String>,
    /// Star rating, 1-5
    pub rating: u8,
    /// Review text
    pub body: String,
    /// Moderation status
    pub status: ReviewStatus,
    /// Aggregate like count
    pub likes: i64,
    /// Aggregate dislike count
    pub dislikes: i64,
    /// Server-assigned last modification time
    pub updated_at: DateTime<Utc>,
    /// Local-only: the viewer's own reaction
    pub my_reaction: Option<Reaction>,
    /// Local-only: whether the viewer authored this review
    pub is_mine: bool,
    /// Local-only: moderation rejection reason shown to the author
    pub rejection_reason: Option<String>,
}

/// The locally-owned slice of a review row, keyed by id during a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalReviewState {
    pub my_reaction: Option<Reaction>,
    pub is_mine: bool,
    pub rejection_reason: Option<String>,
}

/// A review row as returned by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteReview {
    pub id: ReviewId,
    pub attraction_id: AttractionId,
    pub author_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    pub rating: u8,
    pub body: String,
    pub status: ReviewStatus,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub dislikes: i64,
    pub updated_at: DateTime<Utc>,
}

impl RemoteReview {
    /// Merge a server row with the locally-known per-id state.
    #[must_use]
    pub fn into_local(self, local: Option<&LocalReviewState>) -> Review {
        let local = local.cloned().unwrap_or_default();
        Review {
            id: self.id,
            attraction_id: self.attraction_id,
            author_id: self.author_id,
            author_name: self.author_name,
            rating: self.rating,
            body: self.body,
            status: self.status,
            likes: self.likes,
            dislikes: self.dislikes,
            updated_at: self.updated_at,
            my_reaction: local.my_reaction,
            is_mine: local.is_mine,
            rejection_reason: local.rejection_reason,
        }
    }
}

/// Payload for submitting a new review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReview {
    pub attraction_id: AttractionId,
    pub rating: u8,
    pub body: String,
}
