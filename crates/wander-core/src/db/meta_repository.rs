//! Key/value metadata repository - watermarks, per-parent stamps, session

use rusqlite::params;

use super::{lock_connection, SharedConnection};
use crate::auth::{AuthError, AuthResult, AuthSession, SessionStore};
use crate::error::Result;

/// Key under which the persisted auth session lives
const SESSION_KEY: &str = "auth.session";

/// Trait for the small key/value area of the cache store
pub trait MetaStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key; missing keys are not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// `SQLite` implementation of `MetaStore`
pub struct SqliteMetaStore {
    conn: SharedConnection,
}

impl SqliteMetaStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl MetaStore for SqliteMetaStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = lock_connection(&self.conn)?;
        let result = conn.query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute("DELETE FROM sync_meta WHERE key = ?", params![key])?;
        Ok(())
    }
}

/// Session persistence over the same kv area.
///
/// The session is stored as JSON; tokens therefore live inside the local
/// database file, which platform shells are expected to keep in
/// app-private storage.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: SharedConnection,
}

impl SqliteSessionStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn meta(&self) -> SqliteMetaStore {
        SqliteMetaStore::new(std::sync::Arc::clone(&self.conn))
    }
}

impl SessionStore for SqliteSessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let raw = self
            .meta()
            .get(SESSION_KEY)
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        match raw {
            Some(json) => {
                let session = serde_json::from_str(&json)
                    .map_err(|e| AuthError::Storage(format!("corrupt persisted session: {e}")))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let json =
            serde_json::to_string(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.meta()
            .set(SESSION_KEY, &json)
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn clear_session(&self) -> AuthResult<()> {
        self.meta()
            .delete(SESSION_KEY)
            .map_err(|e| AuthError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::db::Database;

    #[test]
    fn test_meta_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let meta = db.meta();

        assert_eq!(meta.get("sync.attractions.watermark").unwrap(), None);

        meta.set("sync.attractions.watermark", "2024-03-01T10:00:00Z")
            .unwrap();
        assert_eq!(
            meta.get("sync.attractions.watermark").unwrap().as_deref(),
            Some("2024-03-01T10:00:00Z")
        );

        meta.set("sync.attractions.watermark", "2024-03-02T10:00:00Z")
            .unwrap();
        assert_eq!(
            meta.get("sync.attractions.watermark").unwrap().as_deref(),
            Some("2024-03-02T10:00:00Z")
        );

        meta.delete("sync.attractions.watermark").unwrap();
        assert_eq!(meta.get("sync.attractions.watermark").unwrap(), None);

        // Deleting a missing key is fine
        meta.delete("sync.attractions.watermark").unwrap();
    }

    #[test]
    fn test_session_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let store = db.sessions();

        assert!(store.load_session().unwrap().is_none());

        let session = AuthSession {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 1_900_000_000,
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some("ada@example.com".to_string()),
            },
        };
        store.save_session(&session).unwrap();

        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded, session);

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }
}
