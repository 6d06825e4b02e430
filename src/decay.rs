//! Time-based decay scoring.
//!
//! Pure functions of entry fields and a caller-supplied clock; nothing here
//! mutates state. The same scoring is used by the search engine (as a
//! multiplicative weight) and by `compact()` (to find archive candidates),
//! so the two can never disagree about an entry's strength.
//!
//! The curve is a half-life exponential:
//!
//! ```text
//! decay(e) = 2^(-age_days(e) / half_life_effective(e))
//! half_life_effective(e) = half_life_base * type_multiplier(memory_type)
//! ```
//!
//! Type multipliers make mistakes decay 10× slower and preferences and
//! procedures 3× slower than episodic entries, so hard-won corrections
//! outlive routine observations.

use chrono::{DateTime, Utc};

use crate::constants::{ARCHIVE_THRESHOLD, DEFAULT_HALF_LIFE_DAYS};
use crate::memory::types::MemoryEntry;

/// Decay scoring with a configurable base half-life.
#[derive(Debug, Clone, Copy)]
pub struct DecayEngine {
    pub half_life_days: f64,
    pub archive_threshold: f64,
}

impl Default for DecayEngine {
    fn default() -> Self {
        Self {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            archive_threshold: ARCHIVE_THRESHOLD,
        }
    }
}

impl DecayEngine {
    pub fn new(half_life_days: f64, archive_threshold: f64) -> Self {
        Self {
            half_life_days,
            archive_threshold,
        }
    }

    /// Current decay factor in `(0, 1]` for `entry` as of `now`.
    pub fn score(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let age_days = age_days(entry, now);
        if age_days <= 0.0 {
            return 1.0;
        }
        (-age_days / self.effective_half_life(entry)).exp2()
    }

    /// Base half-life scaled by the entry's type multiplier, in days.
    pub fn effective_half_life(&self, entry: &MemoryEntry) -> f64 {
        self.half_life_days * entry.memory_type.decay_multiplier()
    }

    /// True when the entry has decayed below the archive threshold.
    /// Candidates are proposed, never removed, unless `compact()` is
    /// explicitly invoked.
    pub fn is_archive_candidate(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        self.score(entry, now) < self.archive_threshold
    }
}

fn age_days(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    (now - entry.created).num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use chrono::{Duration, TimeZone};

    fn entry_at(created: DateTime<Utc>, memory_type: MemoryType) -> MemoryEntry {
        MemoryEntry::new("decay test entry content", "test", "general", memory_type, created)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn fresh_entry_scores_one() {
        let engine = DecayEngine::default();
        let entry = entry_at(t0(), MemoryType::Episodic);
        assert_eq!(engine.score(&entry, t0()), 1.0);
    }

    #[test]
    fn one_half_life_scores_exactly_half() {
        let engine = DecayEngine::new(1.0, ARCHIVE_THRESHOLD);
        let entry = entry_at(t0(), MemoryType::Episodic);
        let score = engine.score(&entry, t0() + Duration::days(1));
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn type_multiplier_stretches_half_life() {
        let engine = DecayEngine::new(7.0, ARCHIVE_THRESHOLD);
        let mistake = entry_at(t0(), MemoryType::Mistake);
        assert_eq!(engine.effective_half_life(&mistake), 70.0);

        // At 70 days a mistake is at its half-life.
        let score = engine.score(&mistake, t0() + Duration::days(70));
        assert!((score - 0.5).abs() < 1e-9);

        // An episodic entry of the same age is almost gone.
        let episodic = entry_at(t0(), MemoryType::Episodic);
        assert!(engine.score(&episodic, t0() + Duration::days(70)) < 0.001);
    }

    #[test]
    fn archive_candidate_below_threshold() {
        let engine = DecayEngine::new(1.0, 0.05);
        let entry = entry_at(t0(), MemoryType::Episodic);

        // 2^-5 = 0.03125 < 0.05
        assert!(engine.is_archive_candidate(&entry, t0() + Duration::days(5)));
        // 2^-4 = 0.0625 >= 0.05
        assert!(!engine.is_archive_candidate(&entry, t0() + Duration::days(4)));
    }

    #[test]
    fn future_created_clamps_to_one() {
        let engine = DecayEngine::default();
        let entry = entry_at(t0() + Duration::days(2), MemoryType::Fact);
        assert_eq!(engine.score(&entry, t0()), 1.0);
    }
}
