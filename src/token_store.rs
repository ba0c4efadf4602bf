use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::{AccessToken, CacheKey, FileLock, Result, StoreError};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const LOCK_SUFFIX: &str = "-lock";
const TEMP_SUFFIX: &str = ".tmp";

/// The durable tier below the process-wide memory tier.
pub trait TokenStore: fmt::Debug + Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<AccessToken>>;

    /// Stores `token` for `key`, replacing what was there.
    fn save(&self, key: &CacheKey, token: &AccessToken) -> Result<()>;

    /// Removes the token for `key`; removing an absent token succeeds.
    fn remove(&self, key: &CacheKey) -> Result<()>;

    /// A lock callers may hold around a load-then-save sequence. Stores
    /// that serialize access on their own return `None`.
    fn lock(&self, _key: &CacheKey) -> Option<FileLock> {
        None
    }
}

/// Keeps nothing: tokens live in the memory tier only, for the lifetime of
/// the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryTokenStore;

impl TokenStore for MemoryTokenStore {
    fn load(&self, _key: &CacheKey) -> Result<Option<AccessToken>> {
        Ok(None)
    }

    fn save(&self, _key: &CacheKey, _token: &AccessToken) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &CacheKey) -> Result<()> {
        Ok(())
    }
}

/// One JSON file per token, below `<dir>/<app_id>/`.
///
/// Writes go to a temporary file that is renamed into place, so readers never
/// see half a token. Writers and deleters hold a `FileLock` next to the file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
    owner: Option<String>,
    lock_timeout: Duration,
}

impl FileTokenStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        FileTokenStore {
            dir: dir.into(),
            owner: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Identifies this store's locks with `owner` instead of the process id.
    pub fn with_owner<O: Into<String>>(self, owner: O) -> Self {
        FileTokenStore {
            owner: Some(owner.into()),
            ..self
        }
    }

    /// set how long writers wait for the lock
    pub fn lock_timeout(self, lock_timeout: Duration) -> Self {
        FileTokenStore {
            lock_timeout,
            ..self
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<app_id>/auth.token`, or `auth-<lookup>.token` for a
    /// non-empty lookup id.
    pub fn token_path(&self, key: &CacheKey) -> PathBuf {
        let file_name = if key.lookup_id().is_empty() {
            "auth.token".to_string()
        } else {
            format!("auth-{}.token", encode(key.lookup_id()))
        };
        self.dir.join(encode(key.app_id())).join(file_name)
    }

    fn file_lock(&self, token_path: &Path) -> FileLock {
        let path = with_suffix(token_path, LOCK_SUFFIX);
        match &self.owner {
            Some(owner) => FileLock::with_owner(path, owner.as_str()),
            None => FileLock::new(path),
        }
    }

    fn write_token(&self, path: &Path, token: &AccessToken) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = with_suffix(path, TEMP_SUFFIX);
        fs::write(&temp, serde_json::to_vec_pretty(token)?)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, key: &CacheKey) -> Result<Option<AccessToken>> {
        let path = self.token_path(key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let token = serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!("loaded token from {}", path.display());
        Ok(Some(token))
    }

    fn save(&self, key: &CacheKey, token: &AccessToken) -> Result<()> {
        let path = self.token_path(key);
        let mut lock = self.file_lock(&path);
        lock.acquire(self.lock_timeout)?;
        self.write_token(&path, token)?;
        lock.release()?;
        debug!("saved token to {}", path.display());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.token_path(key);
        let mut lock = self.file_lock(&path);
        lock.acquire(self.lock_timeout)?;
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        lock.release()?;
        Ok(())
    }

    fn lock(&self, key: &CacheKey) -> Option<FileLock> {
        Some(self.file_lock(&self.token_path(key)))
    }
}

fn encode(component: &str) -> String {
    utf8_percent_encode(component, NON_ALPHANUMERIC).to_string()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{AccessLevel, Error};

    fn token() -> AccessToken {
        AccessToken::new("72157-abc", "f00", AccessLevel::Write).with_user(
            "Sybren Stüvel",
            "sybren",
            "73509078@N00",
        )
    }

    #[test]
    fn token_paths() {
        let store = FileTokenStore::new("/tmp/tokens");
        assert_eq!(
            store.token_path(&CacheKey::new("abc123")),
            PathBuf::from("/tmp/tokens/abc123/auth.token")
        );
        assert_eq!(
            store.token_path(&CacheKey::with_lookup("abc123", "user/ü")),
            PathBuf::from("/tmp/tokens/abc123/auth-user%2F%C3%BC.token")
        );
    }

    #[test]
    fn save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        let key = CacheKey::new("abc123");

        assert_eq!(store.load(&key).unwrap(), None);
        store.save(&key, &token()).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(token()));
        assert!(!with_suffix(&store.token_path(&key), LOCK_SUFFIX).exists());
        assert!(!with_suffix(&store.token_path(&key), TEMP_SUFFIX).exists());

        store.remove(&key).unwrap();
        assert_eq!(store.load(&key).unwrap(), None);
        store.remove(&key).unwrap();
    }

    #[test]
    fn lookups_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.save(&CacheKey::with_lookup("abc123", "alice"), &token()).unwrap();
        assert_eq!(store.load(&CacheKey::with_lookup("abc123", "bob")).unwrap(), None);
        assert_eq!(store.load(&CacheKey::new("abc123")).unwrap(), None);
    }

    #[test]
    fn unreadable_token_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        let key = CacheKey::new("abc123");
        let path = store.token_path(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<auth><token>xml from an old version</token></auth>").unwrap();
        assert!(matches!(
            store.load(&key),
            Err(Error::Store(StoreError::Corrupt { .. }))
        ));
    }

    #[test]
    fn write_waits_for_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path())
            .with_owner("process-b")
            .lock_timeout(Duration::from_millis(200));
        let key = CacheKey::new("abc123");

        let mut foreign = FileLock::with_owner(
            with_suffix(&store.token_path(&key), LOCK_SUFFIX),
            "process-a",
        );
        foreign.acquire(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            store.save(&key, &token()),
            Err(Error::Lock(crate::LockError::Timeout { .. }))
        ));
        foreign.release().unwrap();
        store.save(&key, &token()).unwrap();
    }

    #[test]
    fn caller_lock_is_reentered_by_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        let key = CacheKey::new("abc123");

        let mut held = store.lock(&key).unwrap();
        held.acquire(Duration::from_secs(1)).unwrap();
        store.save(&key, &token()).unwrap();
        assert!(held.path().exists());
        held.release().unwrap();
        assert!(!held.path().exists());
    }

    #[test]
    fn memory_store_keeps_nothing() {
        let key = CacheKey::new("abc123");
        MemoryTokenStore.save(&key, &token()).unwrap();
        assert_eq!(MemoryTokenStore.load(&key).unwrap(), None);
        assert!(MemoryTokenStore.lock(&key).is_none());
    }
}
