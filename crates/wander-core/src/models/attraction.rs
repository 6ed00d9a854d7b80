//! Attraction model - the primary synchronized catalog entity

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for an attraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttractionId(Uuid);

impl AttractionId {
    /// Create a new unique attraction ID using UUID v7
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

impl Default for AttractionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttractionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A locally cached attraction.
///
/// `is_favorite` and `last_synced_at` exist only on-device. They are never
/// sent to the server and a sync pass must carry them forward instead of
/// resetting them to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attraction {
    /// Unique identifier
    pub id: AttractionId,
    /// Display name
    pub name: String,
    /// Long-form description
    pub description: String,
    /// Category slug (museum, viewpoint, ...)
    pub category: String,
    /// WGS84 latitude
    pub latitude: f64,
    /// WGS84 longitude
    pub longitude: f64,
    /// Optional cover image URL
    pub image_url: Option<String>,
    /// Server-assigned last modification time
    pub updated_at: DateTime<Utc>,
    /// Whether the record is visible in the public catalog
    pub is_published: bool,
    /// Local-only favorite flag
    pub is_favorite: bool,
    /// Local-only time this row was last written by a sync pass
    pub last_synced_at: DateTime<Utc>,
}

/// An attraction row as returned by the backend.
///
/// Carries only server-owned fields; the local-only fields are grafted on
/// during the merge into the cache.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteAttraction {
    pub id: AttractionId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub is_published: bool,
}

impl RemoteAttraction {
    /// Merge a server row into a local one.
    ///
    /// Server-owned fields are replaced wholesale. `is_favorite` is carried
    /// forward from the existing row when present, otherwise seeded from the
    /// pre-sync favorites snapshot (guards against ordering edge cases when
    /// a row is deleted and re-fetched within the same pass).
    #[must_use]
    pub fn into_local(
        self,
        existing: Option<&Attraction>,
        favorite_snapshot: &HashSet<AttractionId>,
        synced_at: DateTime<Utc>,
    ) -> Attraction {
        let is_favorite = existing
            .map(|row| row.is_favorite)
            .unwrap_or_else(|| favorite_snapshot.contains(&self.id));

        Attraction {
            id: self.id,
            name: self.name,
            description: self.description,
            category: self.category,
            latitude: self.latitude,
            longitude: self.longitude,
            image_url: self.image_url,
            updated_at: self.updated_at,
            is_published: self.is_published,
            is_favorite,
            last_synced_at: synced_at,
        }
    }
}
