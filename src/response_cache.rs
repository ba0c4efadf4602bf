use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_ENTRIES: usize = 200;
/// A full cache drops one entry in this many.
const CULL_FREQUENCY: usize = 3;

#[derive(Debug, Clone)]
struct CachedResponse {
    body: String,
    stored_at: Instant,
    expires_at: Instant,
}

/// Response bodies of API calls, keyed by the call's parameters.
///
/// Entries expire after `timeout`. Storing into a cache holding
/// `max_entries` first prunes expired entries, then the oldest third.
#[derive(Debug)]
pub struct ResponseCache {
    timeout: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_limits(DEFAULT_TIMEOUT, DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    /// Five minutes, 200 entries.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(timeout: Duration, max_entries: usize) -> Self {
        ResponseCache {
            timeout,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.body.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set<K: Into<String>, B: Into<String>>(&self, key: K, body: B) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            cull(&mut entries, now, self.max_entries);
        }
        entries.insert(
            key,
            CachedResponse {
                body: body.into(),
                stored_at: now,
                expires_at: now + self.timeout,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of entries, expired ones included until they are pruned.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cull(entries: &mut HashMap<String, CachedResponse>, now: Instant, max_entries: usize) {
    entries.retain(|_, entry| entry.expires_at > now);
    if entries.len() < max_entries {
        return;
    }
    let doomed = (entries.len() + CULL_FREQUENCY - 1) / CULL_FREQUENCY;
    let mut by_age: Vec<(Instant, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.stored_at, key.clone()))
        .collect();
    by_age.sort();
    for (_, key) in by_age.into_iter().take(doomed) {
        entries.remove(&key);
    }
    debug!("response cache culled {} entries", doomed);
}

/// The cache key of a call: its parameters, sorted and form-encoded.
pub(crate) fn cache_key(params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}
