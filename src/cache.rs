//! Short-lived response cache shared by every task of a sweep.
//!
//! Entries are spread over independently locked shards so concurrent
//! fetchers never wait on one global lock.

use crate::request::{FetchResponse, HttpMethod};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    method: HttpMethod,
    params: Vec<(String, String)>,
}

impl CacheKey {
    /// Trailing slashes are ignored and parameters are kept sorted.
    pub fn new(url: &str, method: HttpMethod, params: Vec<(String, String)>) -> Self {
        let mut params = params;
        params.sort();
        Self {
            url: url.trim_end_matches('/').to_string(),
            method,
            params,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct Entry {
    response: FetchResponse,
    stored_at: Instant,
}

pub struct ResponseCache {
    shards: Vec<Mutex<HashMap<CacheKey, Entry>>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn shard(&self, key: &CacheKey) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<FetchResponse> {
        let mut shard = self.shard(key);
        match shard.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.response.clone()),
            Some(_) => {
                shard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, response: FetchResponse) {
        if self.ttl.is_zero() {
            return;
        }
        self.shard(&key).insert(
            key,
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    /// Returns true when an entry was removed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.shard(key).remove(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = shard.len();
            shard.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
            removed += before - shard.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
