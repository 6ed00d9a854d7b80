//! Tombstone rows from the deletion feed

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Entity type value for attraction tombstones
pub const ENTITY_TYPE_ATTRACTION: &str = "attraction";

/// A deletion marker fetched from the dedicated feed.
///
/// Presence of a row means the entity with `entity_id` must be purged from
/// the local cache. Tombstones are applied and discarded, never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tombstone {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    /// Whether this tombstone targets the given entity type
    #[must_use]
    pub fn targets(&self, entity_type: &str) -> bool {
        self.entity_type == entity_type
    }
}
