//! Attraction repository implementation

use std::collections::HashSet;

use rusqlite::{params, Row};

use super::{lock_connection, SharedConnection};
use crate::error::{Error, Result};
use crate::models::{Attraction, AttractionId};
use crate::util::millis_to_datetime;

/// Trait for attraction cache operations.
///
/// The sync engines only ever merge through this interface; they never
/// bypass it to touch rows directly, which is what keeps the local-only
/// fields safe across sync passes.
pub trait AttractionStore: Send + Sync {
    /// Get an attraction by ID
    fn get(&self, id: &AttractionId) -> Result<Option<Attraction>>;

    /// Insert or replace a row (all columns supplied by the caller)
    fn upsert(&self, attraction: &Attraction) -> Result<()>;

    /// Remove a row; returns whether anything was deleted
    fn delete(&self, id: &AttractionId) -> Result<bool>;

    /// List all cached attractions, most recently updated first
    fn list(&self) -> Result<Vec<Attraction>>;

    /// IDs of every attraction currently marked favorite
    fn favorite_ids(&self) -> Result<HashSet<AttractionId>>;

    /// Flip the local-only favorite flag
    fn set_favorite(&self, id: &AttractionId, favorite: bool) -> Result<()>;

    /// Number of cached rows
    fn count(&self) -> Result<usize>;

    /// Purge the table and insert the given rows in one transaction
    fn replace_all(&self, attractions: &[Attraction]) -> Result<()>;
}

/// `SQLite` implementation of `AttractionStore`
pub struct SqliteAttractionStore {
    conn: SharedConnection,
}

impl SqliteAttractionStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Parse an attraction from a database row
    fn parse_attraction(row: &Row<'_>) -> rusqlite::Result<Attraction> {
        let id: String = row.get(0)?;
        Ok(Attraction {
            id: id.parse().unwrap_or_default(),
            name: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            image_url: row.get(6)?,
            updated_at: millis_to_datetime(row.get(7)?),
            is_published: row.get::<_, i32>(8)? != 0,
            is_favorite: row.get::<_, i32>(9)? != 0,
            last_synced_at: millis_to_datetime(row.get(10)?),
        })
    }

    fn insert_row(conn: &rusqlite::Connection, attraction: &Attraction) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO attractions
             (id, name, description, category, latitude, longitude, image_url,
              updated_at, is_published, is_favorite, last_synced_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                attraction.id.as_str(),
                attraction.name,
                attraction.description,
                attraction.category,
                attraction.latitude,
                attraction.longitude,
                attraction.image_url,
                attraction.updated_at.timestamp_millis(),
                i32::from(attraction.is_published),
                i32::from(attraction.is_favorite),
                attraction.last_synced_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "id, name, description, category, latitude, longitude, image_url, \
                              updated_at, is_published, is_favorite, last_synced_at";

impl AttractionStore for SqliteAttractionStore {
    fn get(&self, id: &AttractionId) -> Result<Option<Attraction>> {
        let conn = lock_connection(&self.conn)?;
        let result = conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM attractions WHERE id = ?"),
            params![id.as_str()],
            Self::parse_attraction,
        );

        match result {
            Ok(attraction) => Ok(Some(attraction)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upsert(&self, attraction: &Attraction) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        Self::insert_row(&conn, attraction)
    }

    fn delete(&self, id: &AttractionId) -> Result<bool> {
        let conn = lock_connection(&self.conn)?;
        let rows = conn.execute(
            "DELETE FROM attractions WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn list(&self) -> Result<Vec<Attraction>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM attractions ORDER BY updated_at DESC"
        ))?;

        let attractions = stmt
            .query_map([], Self::parse_attraction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(attractions)
    }

    fn favorite_ids(&self) -> Result<HashSet<AttractionId>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare("SELECT id FROM attractions WHERE is_favorite = 1")?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
    }

    fn set_favorite(&self, id: &AttractionId, favorite: bool) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        let rows = conn.execute(
            "UPDATE attractions SET is_favorite = ? WHERE id = ?",
            params![i32::from(favorite), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM attractions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn replace_all(&self, attractions: &[Attraction]) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM attractions", [])?;
        for attraction in attractions {
            Self::insert_row(&tx, attraction)?;
        }
        tx.commit()?;
        Ok(())
    }
}
