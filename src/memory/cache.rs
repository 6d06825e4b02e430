//! LRU cache of search results.
//!
//! Keys are fingerprints of `(query, filters)`; values are ranked id
//! lists, never entry objects. Entries are re-fetched through the
//! authoritative map after a hit, so reinforcement counters are always
//! read-your-writes fresh. Any mutation of the entry set clears the whole
//! cache.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::memory::types::SearchOptions;

/// Cached ranked ids for one fingerprint.
pub type CachedIds = Vec<String>;

pub struct ReadCache {
    cache: Cache<String, CachedIds>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReadCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::new(max_entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stable fingerprint over the query string and every filter that can
    /// change the result set.
    pub fn fingerprint(query: &str, opts: &SearchOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update(b"|");
        hasher.update(opts.category.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", opts.memory_type).as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", opts.min_confidence).as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", opts.limit).as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, fingerprint: &str) -> Option<CachedIds> {
        match self.cache.get(fingerprint) {
            Some(ids) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %&fingerprint[..8], "read cache hit");
                Some(ids)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, fingerprint: String, ids: CachedIds) {
        self.cache.insert(fingerprint, ids);
    }

    /// Called on every mutation (ingest, purge, forget, feedback).
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;

    #[test]
    fn same_query_same_fingerprint() {
        let opts = SearchOptions::default();
        assert_eq!(
            ReadCache::fingerprint("database decision", &opts),
            ReadCache::fingerprint("Database Decision  ", &opts),
        );
    }

    #[test]
    fn filters_change_fingerprint() {
        let plain = SearchOptions::default();
        let filtered = SearchOptions {
            memory_type: Some(MemoryType::Mistake),
            ..Default::default()
        };
        assert_ne!(
            ReadCache::fingerprint("query", &plain),
            ReadCache::fingerprint("query", &filtered),
        );
    }

    #[test]
    fn hit_miss_accounting() {
        let cache = ReadCache::new(16);
        let fp = ReadCache::fingerprint("q", &SearchOptions::default());

        assert!(cache.get(&fp).is_none());
        cache.put(fp.clone(), vec!["id1".into()]);
        assert_eq!(cache.get(&fp), Some(vec!["id1".into()]));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hit_rate(), 0.5);
    }

    #[test]
    fn invalidate_clears_everything() {
        let cache = ReadCache::new(16);
        let fp = ReadCache::fingerprint("q", &SearchOptions::default());
        cache.put(fp.clone(), vec!["id1".into()]);
        cache.invalidate();
        // moka invalidation is eventually consistent for size, but get
        // must not return stale values.
        assert!(cache.get(&fp).is_none());
    }
}
