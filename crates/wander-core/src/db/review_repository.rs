//! Review repository implementation

use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Row};

use super::{lock_connection, SharedConnection};
use crate::error::{Error, Result};
use crate::models::{AttractionId, LocalReviewState, Reaction, Review, ReviewId, ReviewStatus};
use crate::util::millis_to_datetime;

/// Trait for review cache operations
pub trait ReviewStore: Send + Sync {
    /// Get a review by ID
    fn get(&self, id: &ReviewId) -> Result<Option<Review>>;

    /// Insert or replace a row (all columns supplied by the caller)
    fn upsert(&self, review: &Review) -> Result<()>;

    /// Reviews for one attraction, newest first
    fn for_attraction(&self, attraction_id: &AttractionId) -> Result<Vec<Review>>;

    /// Locally-owned state for the given IDs.
    ///
    /// Callers must chunk large ID sets before calling; the query binds one
    /// parameter per ID and `SQLite` caps bind parameters per statement.
    fn local_states(&self, ids: &[ReviewId]) -> Result<HashMap<ReviewId, LocalReviewState>>;

    /// Set or clear the viewer's reaction on a cached review
    fn set_reaction(&self, id: &ReviewId, reaction: Option<Reaction>) -> Result<()>;

    /// Number of cached rows
    fn count(&self) -> Result<usize>;

    /// Purge the table and insert the given rows in one transaction
    fn replace_all(&self, reviews: &[Review]) -> Result<()>;
}

/// `SQLite` implementation of `ReviewStore`
pub struct SqliteReviewStore {
    conn: SharedConnection,
}

const SELECT_COLUMNS: &str = "id, attraction_id, author_id, author_name, rating, body, status, \
                              likes, dislikes, updated_at, my_reaction, is_mine, rejection_reason";

impl SqliteReviewStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Parse a review from a database row
    fn parse_review(row: &Row<'_>) -> rusqlite::Result<Review> {
        let id: String = row.get(0)?;
        let attraction_id: String = row.get(1)?;
        let status: String = row.get(6)?;
        let my_reaction: Option<String> = row.get(10)?;

        Ok(Review {
            id: id.parse().unwrap_or_default(),
            attraction_id: attraction_id.parse().unwrap_or_default(),
            author_id: row.get(2)?,
            author_name: row.get(3)?,
            rating: row.get(4)?,
            body: row.get(5)?,
            status: ReviewStatus::parse(&status),
            likes: row.get(7)?,
            dislikes: row.get(8)?,
            updated_at: millis_to_datetime(row.get(9)?),
            my_reaction: my_reaction.as_deref().and_then(Reaction::parse),
            is_mine: row.get::<_, i32>(11)? != 0,
            rejection_reason: row.get(12)?,
        })
    }

    fn insert_row(conn: &rusqlite::Connection, review: &Review) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO reviews
             (id, attraction_id, author_id, author_name, rating, body, status,
              likes, dislikes, updated_at, my_reaction, is_mine, rejection_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                review.id.as_str(),
                review.attraction_id.as_str(),
                review.author_id,
                review.author_name,
                review.rating,
                review.body,
                review.status.as_str(),
                review.likes,
                review.dislikes,
                review.updated_at.timestamp_millis(),
                review.my_reaction.map(Reaction::as_str),
                i32::from(review.is_mine),
                review.rejection_reason,
            ],
        )?;
        Ok(())
    }
}

impl ReviewStore for SqliteReviewStore {
    fn get(&self, id: &ReviewId) -> Result<Option<Review>> {
        let conn = lock_connection(&self.conn)?;
        let result = conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM reviews WHERE id = ?"),
            params![id.as_str()],
            Self::parse_review,
        );

        match result {
            Ok(review) => Ok(Some(review)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upsert(&self, review: &Review) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        Self::insert_row(&conn, review)
    }

    fn for_attraction(&self, attraction_id: &AttractionId) -> Result<Vec<Review>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM reviews
             WHERE attraction_id = ?
             ORDER BY updated_at DESC"
        ))?;

        let reviews = stmt
            .query_map(params![attraction_id.as_str()], Self::parse_review)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(reviews)
    }

    fn local_states(&self, ids: &[ReviewId]) -> Result<HashMap<ReviewId, LocalReviewState>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = lock_connection(&self.conn)?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, my_reaction, is_mine, rejection_reason
             FROM reviews WHERE id IN ({placeholders})"
        ))?;

        let rows = stmt
            .query_map(params_from_iter(ids.iter().map(ReviewId::as_str)), |row| {
                let id: String = row.get(0)?;
                let my_reaction: Option<String> = row.get(1)?;
                Ok((
                    id,
                    LocalReviewState {
                        my_reaction: my_reaction.as_deref().and_then(Reaction::parse),
                        is_mine: row.get::<_, i32>(2)? != 0,
                        rejection_reason: row.get(3)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, state)| id.parse().ok().map(|id| (id, state)))
            .collect())
    }

    fn set_reaction(&self, id: &ReviewId, reaction: Option<Reaction>) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        let rows = conn.execute(
            "UPDATE reviews SET my_reaction = ? WHERE id = ?",
            params![reaction.map(Reaction::as_str), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn replace_all(&self, reviews: &[Review]) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM reviews", [])?;
        for review in reviews {
            Self::insert_row(&tx, review)?;
        }
        tx.commit()?;
        Ok(())
    }
}
