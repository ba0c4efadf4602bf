use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, info};

use crate::{AccessToken, FileLock, Result, TokenStore};

/// Identifies a cached token: the application's API key plus an optional
/// lookup id telling several users of one application apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    app_id: String,
    lookup_id: String,
}

impl CacheKey {
    pub fn new<A: Into<String>>(app_id: A) -> Self {
        Self::with_lookup(app_id, "")
    }

    pub fn with_lookup<A: Into<String>, L: Into<String>>(app_id: A, lookup_id: L) -> Self {
        CacheKey {
            app_id: app_id.into(),
            lookup_id: lookup_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn lookup_id(&self) -> &str {
        &self.lookup_id
    }
}

/// Tokens read or written by this process.
///
/// Every `TokenCache` backed by a durable store shares `MemoryTier::global()`
/// unless given its own tier. The entry map is locked only to look up or
/// swap an entry; loading and storing a key is serialized by a per-key gate.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<CacheKey, AccessToken>>,
    gates: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

static GLOBAL_TIER: OnceLock<Arc<MemoryTier>> = OnceLock::new();

impl MemoryTier {
    /// An empty tier shared with nobody.
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    pub fn global() -> Arc<Self> {
        GLOBAL_TIER.get_or_init(MemoryTier::new).clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<AccessToken> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn insert(&self, key: &CacheKey, token: AccessToken) {
        self.write().insert(key.clone(), token);
    }

    fn remove(&self, key: &CacheKey) -> Option<AccessToken> {
        self.write().remove(key)
    }

    fn gate(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, AccessToken>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, AccessToken>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The token of one `CacheKey`, kept in a durable `TokenStore` and mirrored
/// in a `MemoryTier`.
///
/// Loads and writes of one key run under that key's gate, so the two tiers
/// never disagree within the process. A write waiting on a slow store holds
/// up nobody but other writers of the same key.
#[derive(Debug)]
pub struct TokenCache {
    key: CacheKey,
    store: Box<dyn TokenStore>,
    memory: Arc<MemoryTier>,
}

impl TokenCache {
    pub fn new<S: TokenStore + 'static>(key: CacheKey, store: S) -> Self {
        TokenCache {
            key,
            store: Box::new(store),
            memory: MemoryTier::global(),
        }
    }

    /// Uses `memory` instead of the process-wide tier.
    pub fn with_memory(self, memory: Arc<MemoryTier>) -> Self {
        TokenCache { memory, ..self }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn get(&self) -> Result<Option<AccessToken>> {
        if let Some(token) = self.memory.get(&self.key) {
            return Ok(Some(token));
        }
        let gate = self.memory.gate(&self.key);
        let _gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        // another thread may have loaded it while we waited for the gate
        if let Some(token) = self.memory.get(&self.key) {
            return Ok(Some(token));
        }
        let loaded = self.store.load(&self.key)?;
        if let Some(token) = &loaded {
            debug!("token for {:?} loaded from {:?}", self.key, self.store);
            self.memory.insert(&self.key, token.clone());
        }
        Ok(loaded)
    }

    pub fn set(&self, token: AccessToken) -> Result<()> {
        let gate = self.memory.gate(&self.key);
        let _gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.save(&self.key, &token)?;
        info!("stored token for {:?} at level {}", self.key, token.access_level());
        self.memory.insert(&self.key, token);
        Ok(())
    }

    /// Forgets the token. Deleting an absent token is a no-op.
    pub fn delete(&self) -> Result<()> {
        let gate = self.memory.gate(&self.key);
        let _gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(&self.key)?;
        if self.memory.remove(&self.key).is_some() {
            info!("forgot token for {:?}", self.key);
        }
        Ok(())
    }

    /// Acquires the store's lock for this key, if the store has one. Writes
    /// through this cache re-enter the lock while it is held.
    pub fn lock(&self, timeout: Duration) -> Result<Option<FileLock>> {
        match self.store.lock(&self.key) {
            Some(mut lock) => {
                lock.acquire(timeout)?;
                Ok(Some(lock))
            }
            None => Ok(None),
        }
    }
}
