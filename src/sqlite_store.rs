use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{AccessLevel, AccessToken, CacheKey, Result, StoreError, StoreResult, TokenStore};

const DB_FILE: &str = "oauth-tokens.sqlite";
const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS oauth_tokens (
    api_key            TEXT NOT NULL,
    lookup_key         TEXT NOT NULL,
    oauth_token        TEXT NOT NULL,
    oauth_token_secret TEXT NOT NULL,
    access_level       TEXT NOT NULL,
    fullname           TEXT NOT NULL,
    username           TEXT NOT NULL,
    user_nsid          TEXT NOT NULL,
    PRIMARY KEY (api_key, lookup_key)
);
";

/// All tokens of all applications in one SQLite database,
/// `<dir>/oauth-tokens.sqlite`.
///
/// SQLite serializes writers itself, so this store hands out no lock.
#[derive(Debug)]
pub struct SqliteTokenStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Opens or creates the database below `dir`.
    ///
    /// # Errors
    ///
    /// `StoreError::VersionMismatch` when the file was written by another
    /// schema version, `StoreError::Corrupt` when it is no database at all.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path).map_err(StoreError::from)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(StoreError::from)?;
        init_schema(&conn, &path)?;
        debug!("token database at {}", path.display());
        Ok(SqliteTokenStore {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select(&self, key: &CacheKey) -> StoreResult<Option<AccessToken>> {
        let row = self
            .conn()
            .query_row(
                "SELECT oauth_token, oauth_token_secret, access_level, fullname, username, user_nsid
                 FROM oauth_tokens WHERE api_key = ?1 AND lookup_key = ?2",
                params![key.app_id(), key.lookup_id()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let (token, token_secret, level, fullname, username, user_nsid) = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let level: AccessLevel = level.parse().map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: format!("{}", e),
        })?;
        Ok(Some(
            AccessToken::new(token, token_secret, level).with_user(fullname, username, user_nsid),
        ))
    }
}

impl TokenStore for SqliteTokenStore {
    fn load(&self, key: &CacheKey) -> Result<Option<AccessToken>> {
        Ok(self.select(key)?)
    }

    fn save(&self, key: &CacheKey, token: &AccessToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO oauth_tokens
                 (api_key, lookup_key, oauth_token, oauth_token_secret, access_level, fullname, username, user_nsid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key.app_id(),
                    key.lookup_id(),
                    token.token(),
                    token.token_secret(),
                    token.access_level().as_str(),
                    token.fullname(),
                    token.username(),
                    token.user_nsid(),
                ],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM oauth_tokens WHERE api_key = ?1 AND lookup_key = ?2",
                params![key.app_id(), key.lookup_id()],
            )
            .map_err(StoreError::from)?;
        debug!("removed {} token(s) for {:?}", removed, key);
        Ok(())
    }
}

fn init_schema(conn: &Connection, path: &Path) -> StoreResult<()> {
    let found: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    match found {
        0 => {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            info!("created token database {}", path.display());
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(StoreError::VersionMismatch {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    fn token() -> AccessToken {
        AccessToken::new("72157-abc", "f00", AccessLevel::Delete).with_user(
            "Ünïcødé Üser",
            "ユーザー",
            "73509078@N00",
        )
    }

    #[test]
    fn save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::open(dir.path()).unwrap();
        let key = CacheKey::new("abc123");

        assert_eq!(store.load(&key).unwrap(), None);
        store.save(&key, &token()).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(token()));

        store.remove(&key).unwrap();
        assert_eq!(store.load(&key).unwrap(), None);
        store.remove(&key).unwrap();
    }

    #[test]
    fn save_replaces_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::open(dir.path()).unwrap();
        let key = CacheKey::with_lookup("abc123", "alice");
        store.save(&key, &token()).unwrap();
        let newer = AccessToken::new("T2", "S2", AccessLevel::Read);
        store.save(&key, &newer).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(newer));
        assert_eq!(store.load(&CacheKey::new("abc123")).unwrap(), None);
    }

    #[test]
    fn reopened_database_keeps_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new("abc123");
        SqliteTokenStore::open(dir.path())
            .unwrap()
            .save(&key, &token())
            .unwrap();
        let reopened = SqliteTokenStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load(&key).unwrap(), Some(token()));
        assert!(reopened.lock(&key).is_none());
    }

    #[test]
    fn foreign_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let conn = Connection::open(dir.path().join(DB_FILE)).unwrap();
            conn.pragma_update(None, "user_version", 7i64).unwrap();
        }
        match SqliteTokenStore::open(dir.path()) {
            Err(Error::Store(StoreError::VersionMismatch { found, expected, .. })) => {
                assert_eq!(found, 7);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected a version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DB_FILE), "this is not a database. ".repeat(64)).unwrap();
        assert!(matches!(
            SqliteTokenStore::open(dir.path()),
            Err(Error::Store(StoreError::Corrupt { .. }))
        ));
    }
}
