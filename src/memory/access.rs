//! Read-time access tracking.
//!
//! Records which entries search returns and how often, in
//! `access_counts.json` at the workspace root. Counts are applied in one
//! batch at the end of each search call and persisted under lock, so
//! cooperating processes see each other's reinforcement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::fsio;

pub const ACCESS_COUNTS_FILE: &str = "access_counts.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessRecord {
    count: u64,
    last_accessed: DateTime<Utc>,
}

/// Per-entry access counts with batched persistence.
#[derive(Debug)]
pub struct AccessTracker {
    path: PathBuf,
    records: BTreeMap<String, AccessRecord>,
}

impl AccessTracker {
    /// Load existing counts; a missing or unreadable file starts empty.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join(ACCESS_COUNTS_FILE);
        let records = match fsio::read_json(&path) {
            Ok(map) => map,
            Err(_) => BTreeMap::new(),
        };
        Self { path, records }
    }

    /// Apply one batch of hits from a finished search.
    pub fn record_batch<'a>(&mut self, ids: impl Iterator<Item = &'a str>, now: DateTime<Utc>) {
        for id in ids {
            let record = self.records.entry(id.to_string()).or_insert(AccessRecord {
                count: 0,
                last_accessed: now,
            });
            record.count += 1;
            record.last_accessed = now;
        }
    }

    pub fn count(&self, id: &str) -> u64 {
        self.records.get(id).map_or(0, |r| r.count)
    }

    pub fn forget(&mut self, id: &str) {
        self.records.remove(id);
    }

    /// Top-N hottest entries, by count descending.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self
            .records
            .iter()
            .map(|(id, r)| (id.clone(), r.count))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(n);
        pairs
    }

    /// Persist atomically under the file's lock.
    pub fn save(&self, lock_timeout_s: u64, stale_age_s: u64) -> Result<()> {
        fsio::write_json_locked(&self.path, &self.records, lock_timeout_s, stale_age_s)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn batch_recording_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = AccessTracker::load(dir.path());

        tracker.record_batch(["a", "b"].into_iter(), now());
        tracker.record_batch(["a"].into_iter(), now());

        assert_eq!(tracker.count("a"), 2);
        assert_eq!(tracker.count("b"), 1);
        assert_eq!(tracker.count("c"), 0);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = AccessTracker::load(dir.path());
        tracker.record_batch(["x"].into_iter(), now());
        tracker.save(5, 300).unwrap();

        let reloaded = AccessTracker::load(dir.path());
        assert_eq!(reloaded.count("x"), 1);
    }

    #[test]
    fn top_orders_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = AccessTracker::load(dir.path());
        for _ in 0..3 {
            tracker.record_batch(["hot"].into_iter(), now());
        }
        tracker.record_batch(["cold"].into_iter(), now());

        let top = tracker.top(1);
        assert_eq!(top, vec![("hot".to_string(), 3)]);
    }

    #[test]
    fn forget_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = AccessTracker::load(dir.path());
        tracker.record_batch(["gone"].into_iter(), now());
        tracker.forget("gone");
        assert_eq!(tracker.count("gone"), 0);
        assert!(tracker.is_empty());
    }
}
