use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{LockError, LockResult};

const OWNER_FILE: &str = "owner";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const UNRECORDED_OWNER: &str = "<unrecorded>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    No,
    /// this instance created the marker and removes it on release
    Created,
    /// the marker already belonged to our owner id
    Reentered,
}

/// A cross-process lock: a marker directory holding the owner's id.
///
/// Directory creation is atomic, so two processes can never both believe
/// they created the marker. The owner id is the process id unless given
/// explicitly; acquiring a marker that already carries our id succeeds
/// immediately, and releasing such a re-entered lock leaves the marker alone.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    owner: String,
    held: Held,
}

impl FileLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_owner(path, process::id().to_string())
    }

    pub fn with_owner<P: Into<PathBuf>, O: Into<String>>(path: P, owner: O) -> Self {
        FileLock {
            path: path.into(),
            owner: owner.into(),
            held: Held::No,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held != Held::No
    }

    /// Takes the lock, polling every 100 ms while another owner holds it.
    pub fn acquire(&mut self, timeout: Duration) -> LockResult<()> {
        if self.is_held() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let started = Instant::now();
        loop {
            match fs::create_dir(&self.path) {
                Ok(()) => {
                    fs::write(self.path.join(OWNER_FILE), &self.owner).map_err(|e| self.io_error(e))?;
                    self.held = Held::Created;
                    debug!("acquired {} as {}", self.path.display(), self.owner);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if self.read_owner()?.as_deref() == Some(self.owner.as_str()) {
                        self.held = Held::Reentered;
                        debug!("re-entered {} as {}", self.path.display(), self.owner);
                        return Ok(());
                    }
                }
                Err(e) => return Err(self.io_error(e)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Gives the lock up. Only a marker this instance created and that still
    /// records our owner id is removed; anything else is reported as
    /// `NotOwner`. A marker that has already disappeared is only logged.
    pub fn release(&mut self) -> LockResult<()> {
        match self.held {
            Held::Reentered => {
                self.held = Held::No;
                debug!("left re-entered {}", self.path.display());
                return Ok(());
            }
            Held::No if !self.path.exists() => return Ok(()),
            Held::No => return Err(self.not_owner()?),
            Held::Created => {}
        }
        if !self.path.exists() {
            warn!("lock {} is already gone", self.path.display());
            self.held = Held::No;
            return Ok(());
        }
        if self.read_owner()?.as_deref() != Some(self.owner.as_str()) {
            return Err(self.not_owner()?);
        }
        fs::remove_dir_all(&self.path).map_err(|e| self.io_error(e))?;
        self.held = Held::No;
        debug!("released {}", self.path.display());
        Ok(())
    }

    fn not_owner(&self) -> LockResult<LockError> {
        // an owner that is not recorded yet is someone mid-acquire
        let owner = self.read_owner()?.unwrap_or_else(|| UNRECORDED_OWNER.to_string());
        Ok(LockError::NotOwner {
            path: self.path.clone(),
            owner,
        })
    }

    fn read_owner(&self) -> LockResult<Option<String>> {
        match fs::read_to_string(self.path.join(OWNER_FILE)) {
            Ok(owner) => Ok(Some(owner.trim().to_string())),
            // created but not written yet, or removed in between
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held == Held::Created {
            if let Err(e) = self.release() {
                warn!("could not release {} : {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("auth.token-lock")
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::new(lock_path(&dir));
        lock.acquire(Duration::from_secs(1)).unwrap();
        assert!(lock.is_held());
        assert_eq!(
            fs::read_to_string(lock_path(&dir).join(OWNER_FILE)).unwrap(),
            process::id().to_string()
        );
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert!(!lock_path(&dir).exists());
    }

    #[test]
    fn second_owner_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let data = dir.path().join("auth.token");
        let released = Arc::new(AtomicBool::new(false));

        let mut first = FileLock::with_owner(&path, "process-a");
        first.acquire(Duration::from_secs(1)).unwrap();

        let second = {
            let path = path.clone();
            let data = data.clone();
            let released = released.clone();
            thread::spawn(move || {
                let mut second = FileLock::with_owner(path, "process-b");
                second.acquire(Duration::from_secs(10)).unwrap();
                let seen_released = released.load(Ordering::SeqCst);
                let content = fs::read_to_string(&data).unwrap();
                second.release().unwrap();
                (seen_released, content)
            })
        };

        thread::sleep(Duration::from_millis(300));
        fs::write(&data, "first half").unwrap();
        thread::sleep(Duration::from_millis(150));
        fs::write(&data, "first half, second half").unwrap();
        released.store(true, Ordering::SeqCst);
        first.release().unwrap();

        let (seen_released, content) = second.join().unwrap();
        assert!(seen_released);
        assert_eq!(content, "first half, second half");
    }

    #[test]
    fn times_out_on_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileLock::with_owner(lock_path(&dir), "process-a");
        first.acquire(Duration::from_secs(1)).unwrap();

        let mut second = FileLock::with_owner(lock_path(&dir), "process-b");
        let result = second.acquire(Duration::from_millis(250));
        match result {
            Err(LockError::Timeout { waited, .. }) => assert!(waited >= Duration::from_millis(250)),
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(!second.is_held());
    }

    #[test]
    fn release_of_foreign_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileLock::with_owner(lock_path(&dir), "process-a");
        first.acquire(Duration::from_secs(1)).unwrap();

        let mut second = FileLock::with_owner(lock_path(&dir), "process-b");
        match second.release() {
            Err(LockError::NotOwner { owner, .. }) => assert_eq!(owner, "process-a"),
            other => panic!("expected NotOwner, got {:?}", other),
        }
        assert!(lock_path(&dir).exists());
    }

    #[test]
    fn release_never_removes_a_marker_without_owner() {
        let dir = tempfile::tempdir().unwrap();
        // another process has created the marker but not written its id yet
        fs::create_dir(lock_path(&dir)).unwrap();

        let mut lock = FileLock::with_owner(lock_path(&dir), "process-b");
        match lock.release() {
            Err(LockError::NotOwner { owner, .. }) => assert_eq!(owner, UNRECORDED_OWNER),
            other => panic!("expected NotOwner, got {:?}", other),
        }
        assert!(lock_path(&dir).exists());
    }

    #[test]
    fn release_without_acquire_and_without_marker_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::with_owner(lock_path(&dir), "process-b");
        lock.release().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn release_refuses_marker_taken_over_by_another_owner() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::with_owner(lock_path(&dir), "process-a");
        lock.acquire(Duration::from_secs(1)).unwrap();
        fs::write(lock_path(&dir).join(OWNER_FILE), "process-c").unwrap();

        match lock.release() {
            Err(LockError::NotOwner { owner, .. }) => assert_eq!(owner, "process-c"),
            other => panic!("expected NotOwner, got {:?}", other),
        }
        drop(lock);
        // dropping leaves the other owner's marker alone as well
        assert!(lock_path(&dir).exists());
    }

    #[test]
    fn release_of_vanished_lock_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::new(lock_path(&dir));
        lock.acquire(Duration::from_secs(1)).unwrap();
        fs::remove_dir_all(lock_path(&dir)).unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn reentered_lock_keeps_outer_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut outer = FileLock::with_owner(lock_path(&dir), "process-a");
        outer.acquire(Duration::from_secs(1)).unwrap();

        {
            let mut inner = FileLock::with_owner(lock_path(&dir), "process-a");
            inner.acquire(Duration::from_millis(10)).unwrap();
            assert!(inner.is_held());
            inner.release().unwrap();
        }
        assert!(lock_path(&dir).exists());

        {
            // dropping a re-entered lock leaves the marker too
            let mut inner = FileLock::with_owner(lock_path(&dir), "process-a");
            inner.acquire(Duration::from_millis(10)).unwrap();
        }
        assert!(lock_path(&dir).exists());

        outer.release().unwrap();
        assert!(!lock_path(&dir).exists());
    }

    #[test]
    fn drop_releases_created_lock() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut lock = FileLock::new(lock_path(&dir));
            lock.acquire(Duration::from_secs(1)).unwrap();
            assert!(lock_path(&dir).exists());
        }
        assert!(!lock_path(&dir).exists());
    }
}
