//! Configuration for the memory store.
//!
//! Sensible defaults from [`crate::constants`], overridable per instance or
//! through `KEEPSAKE_*` environment variables. `WORKSPACE_PATH` is honored
//! when no explicit workspace is passed.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// All tunables for a [`crate::memory::MemorySystem`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Root directory holding shards, indexes, WAL, and logs.
    pub workspace: PathBuf,

    /// Base decay half-life in days.
    pub half_life_days: f64,

    /// Minimum content length accepted at ingest.
    pub min_content_len: usize,

    /// WAL records before auto-flush.
    pub wal_flush_count: usize,

    /// WAL size in bytes before auto-flush.
    pub wal_flush_bytes: u64,

    /// In-memory cap during bulk ingest (warning only).
    pub bulk_active_cap: usize,

    /// LRU search cache size.
    pub cache_max_entries: u64,

    /// Stale lock threshold in seconds.
    pub stale_lock_age_s: u64,

    /// Blocking lock acquisition timeout in seconds.
    pub lock_timeout_s: u64,

    /// Shard files above this size are split candidates for the compactor.
    pub max_shard_bytes: u64,

    /// Decay score below which entries become archive candidates.
    pub archive_threshold: f64,

    /// When true, `compact()` applies proposed near-duplicate merges
    /// instead of only reporting them.
    pub auto_merge_near_duplicates: bool,

    /// Terms auto-tagged when present in content. Merged with explicit
    /// `@tag` tokens at ingest.
    pub tag_terms: Vec<String>,
}

/// Default auto-tag vocabulary.
const DEFAULT_TAG_TERMS: &[&str] = &[
    "web3",
    "ethereum",
    "postgresql",
    "optimization",
    "cost",
    "revenue",
    "security",
    "deployment",
    "production",
    "testing",
];

impl Default for MemoryConfig {
    fn default() -> Self {
        let workspace = env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./memory_store"));
        Self {
            workspace,
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            min_content_len: MIN_CONTENT_LEN,
            wal_flush_count: WAL_FLUSH_COUNT,
            wal_flush_bytes: WAL_FLUSH_BYTES,
            bulk_active_cap: BULK_ACTIVE_CAP,
            cache_max_entries: CACHE_MAX_ENTRIES,
            stale_lock_age_s: STALE_LOCK_AGE_SECS,
            lock_timeout_s: LOCK_TIMEOUT_SECS,
            max_shard_bytes: MAX_SHARD_BYTES,
            archive_threshold: ARCHIVE_THRESHOLD,
            auto_merge_near_duplicates: false,
            tag_terms: DEFAULT_TAG_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MemoryConfig {
    /// Config rooted at an explicit workspace, everything else default.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("KEEPSAKE_HALF_LIFE_DAYS") {
            if let Ok(n) = val.parse() {
                config.half_life_days = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_MIN_CONTENT_LEN") {
            if let Ok(n) = val.parse() {
                config.min_content_len = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_WAL_FLUSH_COUNT") {
            if let Ok(n) = val.parse() {
                config.wal_flush_count = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_WAL_FLUSH_BYTES") {
            if let Ok(n) = val.parse() {
                config.wal_flush_bytes = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_BULK_ACTIVE_CAP") {
            if let Ok(n) = val.parse() {
                config.bulk_active_cap = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_CACHE_MAX_ENTRIES") {
            if let Ok(n) = val.parse() {
                config.cache_max_entries = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_STALE_LOCK_AGE_S") {
            if let Ok(n) = val.parse() {
                config.stale_lock_age_s = n;
            }
        }

        if let Ok(val) = env::var("KEEPSAKE_AUTO_MERGE") {
            config.auto_merge_near_duplicates = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Merge additional auto-tag terms into the default vocabulary.
    pub fn with_tag_terms(mut self, terms: &[&str]) -> Self {
        for t in terms {
            if !self.tag_terms.iter().any(|e| e == t) {
                self.tag_terms.push(t.to_string());
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = MemoryConfig::new("/tmp/ws");
        assert_eq!(config.half_life_days, 7.0);
        assert_eq!(config.min_content_len, 15);
        assert_eq!(config.wal_flush_count, 50);
        assert_eq!(config.cache_max_entries, 256);
        assert!(!config.auto_merge_near_duplicates);
    }

    #[test]
    fn env_override() {
        env::set_var("KEEPSAKE_HALF_LIFE_DAYS", "1.5");
        env::set_var("KEEPSAKE_WAL_FLUSH_COUNT", "10");

        let config = MemoryConfig::from_env();
        assert_eq!(config.half_life_days, 1.5);
        assert_eq!(config.wal_flush_count, 10);

        env::remove_var("KEEPSAKE_HALF_LIFE_DAYS");
        env::remove_var("KEEPSAKE_WAL_FLUSH_COUNT");
    }

    #[test]
    fn tag_terms_deduplicate() {
        let config = MemoryConfig::new("/tmp/ws").with_tag_terms(&["postgresql", "kafka"]);
        let count = config
            .tag_terms
            .iter()
            .filter(|t| t.as_str() == "postgresql")
            .count();
        assert_eq!(count, 1);
        assert!(config.tag_terms.iter().any(|t| t == "kafka"));
    }
}
