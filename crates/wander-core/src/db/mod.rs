//! Database module - local cache store for the sync layer

mod attraction_repository;
mod connection;
mod meta_repository;
mod migrations;
mod review_repository;

pub use attraction_repository::{AttractionStore, SqliteAttractionStore};
pub use connection::Database;
pub use meta_repository::{MetaStore, SqliteMetaStore, SqliteSessionStore};
pub use review_repository::{ReviewStore, SqliteReviewStore};

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Connection handle shared between the repositories.
///
/// The engines run on a background worker pool, so the connection sits
/// behind a mutex; individual store operations never hold it across await
/// points.
pub(crate) type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

pub(crate) fn lock_connection(
    conn: &SharedConnection,
) -> Result<MutexGuard<'_, rusqlite::Connection>> {
    conn.lock()
        .map_err(|_| Error::Database("connection mutex poisoned".to_string()))
}
