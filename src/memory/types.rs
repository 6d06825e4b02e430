//! Type definitions for the memory store.
//!
//! [`MemoryEntry`] is the atomic unit: immutable content identified by a
//! BLAKE2b-128 content hash, plus mutable stats (importance, confidence,
//! access tracking). The persisted JSON schema is closed: unknown fields
//! are rejected on load so schema drift is caught at the boundary instead
//! of surfacing as silently dropped data.

use std::collections::BTreeMap;

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type Blake2b128 = Blake2b<U16>;

/// Memory type, controlling decay half-life and recall behaviour.
///
/// Mistakes decay 10× slower than episodic memories; preferences and
/// procedures 3× slower. Facts and episodes decay at the base rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    #[default]
    Episodic,
    Fact,
    Preference,
    Procedure,
    Mistake,
}

impl MemoryType {
    /// Half-life multiplier applied on top of the configured base.
    pub fn decay_multiplier(self) -> f64 {
        match self {
            MemoryType::Episodic | MemoryType::Fact => 1.0,
            MemoryType::Preference | MemoryType::Procedure => 3.0,
            MemoryType::Mistake => 10.0,
        }
    }

    /// Starting importance for a fresh entry of this type. Mistakes carry
    /// double weight so corrections surface ahead of routine notes.
    pub fn importance_boost(self) -> f64 {
        match self {
            MemoryType::Episodic => 1.0,
            MemoryType::Fact | MemoryType::Preference => 1.2,
            MemoryType::Procedure => 1.3,
            MemoryType::Mistake => 2.0,
        }
    }
}

/// A single memory unit with metadata.
///
/// Serialized field order and names are the on-disk schema; `id` persists
/// under the key `hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryEntry {
    /// BLAKE2b-128 hex digest of normalized content + source + created.
    #[serde(rename = "hash")]
    pub id: String,

    /// Normalized UTF-8 content, at least 15 characters.
    pub content: String,

    /// Free-form origin tag, e.g. `meeting-notes` or `pipeline:abc`.
    pub source: String,

    /// Shard dimension. Open set: strategic, operational, tactical,
    /// personal, general, ...
    pub category: String,

    pub memory_type: MemoryType,

    /// Creation timestamp; immutable once set.
    pub created: DateTime<Utc>,

    /// Scoring weight in `[0, ∞)`, mutated by access and feedback.
    pub importance: f64,

    /// Reliability in `[0, 1]`.
    pub confidence: f64,

    /// Tag set, kept sorted for a deterministic on-disk representation.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Tone → score in `[0, 1]`, from the keyword tagger.
    #[serde(default)]
    pub sentiment: BTreeMap<String, f64>,

    #[serde(default)]
    pub access_count: u64,

    /// Updated on every search hit.
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    /// Build a new entry. Content is normalized (trimmed) before hashing,
    /// so leading/trailing whitespace never produces a distinct id.
    pub fn new(
        content: &str,
        source: &str,
        category: &str,
        memory_type: MemoryType,
        created: DateTime<Utc>,
    ) -> Self {
        let content = content.trim().to_string();
        let id = content_id(&content, source, &created);
        Self {
            id,
            content,
            source: source.to_string(),
            category: category.to_string(),
            memory_type,
            created,
            importance: 1.0,
            confidence: 0.8,
            tags: Vec::new(),
            sentiment: BTreeMap::new(),
            access_count: 0,
            last_accessed: None,
        }
    }

    /// `YYYY-MM` bucket of the creation timestamp; half of the shard key.
    pub fn shard_month(&self) -> String {
        self.created.format("%Y-%m").to_string()
    }

    /// `YYYY-MM-DD` bucket for the date index.
    pub fn date_bucket(&self) -> String {
        self.created.format("%Y-%m-%d").to_string()
    }

    /// Insert a tag, keeping the set sorted and deduplicated.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if let Err(pos) = self.tags.binary_search(&tag) {
            self.tags.insert(pos, tag);
        }
    }

    /// Record a read hit: bump the access count, refresh `last_accessed`,
    /// and nudge importance with diminishing returns.
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = Some(now);
        let bump = crate::constants::REINFORCEMENT_BOOST
            / (1.0 + self.access_count as f64 * 0.1);
        self.importance =
            (self.importance + bump).min(crate::constants::REINFORCEMENT_IMPORTANCE_CAP);
    }
}

/// Deterministic 128-bit content identity.
pub fn content_id(content: &str, source: &str, created: &DateTime<Utc>) -> String {
    let mut hasher = Blake2b128::new();
    hasher.update(content.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(created.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

/// Why an ingest call produced no new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Content shorter than the configured minimum.
    TooShort,
    /// The input gate classified the content as P3 ephemeral noise.
    Ephemeral,
}

/// Outcome of a single ingest. Rejections are statuses, not errors: only
/// I/O and lock faults escape as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    /// A new entry was stored under this id.
    Stored(String),
    /// Identical content already existed; its access count was bumped.
    Duplicate(String),
    /// Nothing was stored.
    Dropped(DropReason),
}

impl IngestStatus {
    pub fn stored(&self) -> bool {
        matches!(self, IngestStatus::Stored(_))
    }
}

/// Filters and options for a search call.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub category: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub min_confidence: Option<f64>,
    /// Maximum results; `None` means [`crate::constants::DEFAULT_SEARCH_LIMIT`].
    pub limit: Option<usize>,
    /// Attach per-result component scores.
    pub explain: bool,
}

/// Component scores attached to a result when `explain` is requested.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub lexical: f64,
    pub boosts: f64,
    pub decay: f64,
    pub reinforcement: f64,
    pub importance: f64,
    /// Cosine component, present only under the hybrid blend.
    pub semantic: Option<f64>,
}

/// One ranked search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: MemoryEntry,
    /// Raw composite score before normalization.
    pub score: f64,
    /// Normalized to `[0, 1]`; the top result is exactly 1.0.
    pub relevance: f64,
    pub matched_terms: Vec<String>,
    pub breakdown: Option<ScoreBreakdown>,
}

/// Counts returned by purge/forget operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    /// Entries removed from the in-memory map and shards.
    pub removed: usize,
    /// Pending WAL records dropped because they referenced removed ids.
    pub wal_removed: usize,
    /// `removed + wal_removed`.
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn id_is_stable_and_content_sensitive() {
        let a = content_id("Decided to use PostgreSQL", "notes", &ts());
        let b = content_id("Decided to use PostgreSQL", "notes", &ts());
        let c = content_id("Decided to use MySQL", "notes", &ts());
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 128-bit digest = 32 hex chars
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn whitespace_normalization_shares_id() {
        let a = content_id("  padded content  ", "s", &ts());
        let b = content_id("padded content", "s", &ts());
        assert_eq!(a, b);
    }

    #[test]
    fn shard_and_date_buckets() {
        let entry = MemoryEntry::new("some content here", "src", "strategic", MemoryType::Fact, ts());
        assert_eq!(entry.shard_month(), "2026-02");
        assert_eq!(entry.date_bucket(), "2026-02-15");
    }

    #[test]
    fn tags_stay_sorted_and_unique() {
        let mut entry =
            MemoryEntry::new("some content here", "src", "general", MemoryType::Episodic, ts());
        entry.add_tag("zeta");
        entry.add_tag("alpha");
        entry.add_tag("zeta");
        assert_eq!(entry.tags, vec!["alpha", "zeta"]);
    }

    #[test]
    fn reinforce_saturates() {
        let mut entry =
            MemoryEntry::new("some content here", "src", "general", MemoryType::Episodic, ts());
        for _ in 0..1000 {
            entry.reinforce(ts());
        }
        assert_eq!(entry.access_count, 1000);
        assert!(entry.importance <= crate::constants::REINFORCEMENT_IMPORTANCE_CAP);
        assert_eq!(entry.last_accessed, Some(ts()));
    }

    #[test]
    fn persisted_schema_uses_hash_key_and_rejects_unknown_fields() {
        let entry = MemoryEntry::new("schema check content", "src", "general", MemoryType::Fact, ts());
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("hash").is_some());
        assert!(json.get("id").is_none());

        let mut bad = json.clone();
        bad.as_object_mut()
            .unwrap()
            .insert("unexpected".into(), serde_json::json!(1));
        assert!(serde_json::from_value::<MemoryEntry>(bad).is_err());
    }

    #[test]
    fn type_multipliers() {
        assert_eq!(MemoryType::Episodic.decay_multiplier(), 1.0);
        assert_eq!(MemoryType::Fact.decay_multiplier(), 1.0);
        assert_eq!(MemoryType::Preference.decay_multiplier(), 3.0);
        assert_eq!(MemoryType::Procedure.decay_multiplier(), 3.0);
        assert_eq!(MemoryType::Mistake.decay_multiplier(), 10.0);
    }
}
