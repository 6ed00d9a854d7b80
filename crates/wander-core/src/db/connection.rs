//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::{
    migrations, SharedConnection, SqliteAttractionStore, SqliteMetaStore, SqliteReviewStore,
    SqliteSessionStore,
};
use crate::error::Result;

/// Database wrapper owning the shared `SQLite` connection
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Attraction repository bound to this database
    pub fn attractions(&self) -> SqliteAttractionStore {
        SqliteAttractionStore::new(Arc::clone(&self.conn))
    }

    /// Review repository bound to this database
    pub fn reviews(&self) -> SqliteReviewStore {
        SqliteReviewStore::new(Arc::clone(&self.conn))
    }

    /// Key/value metadata repository (watermarks, per-parent stamps)
    pub fn meta(&self) -> SqliteMetaStore {
        SqliteMetaStore::new(Arc::clone(&self.conn))
    }

    /// Session persistence bound to this database's kv area
    pub fn sessions(&self) -> SqliteSessionStore {
        SqliteSessionStore::new(Arc::clone(&self.conn))
    }
}

/// Configure `SQLite` for concurrent local use
fn configure(conn: &Connection) -> Result<()> {
    // WAL needs a file; ignore the error for in-memory databases
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
