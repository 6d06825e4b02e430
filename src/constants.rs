//! Documented constants for the memory store.
//!
//! All tunable parameters in one place. Defaults can be overridden through
//! [`crate::config::MemoryConfig`]; the values here are the single source of
//! truth the config falls back to.

// =============================================================================
// DECAY & REINFORCEMENT
// =============================================================================

/// Base half-life for memory decay, in days.
///
/// After one half-life an untouched entry scores at 50% of its original
/// strength. Seven days keeps a typical working set (current sprint, active
/// decisions) near full strength while last month's noise fades.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 7.0;

/// Decay score below which `compact()` proposes an entry for archival.
pub const ARCHIVE_THRESHOLD: f64 = 0.05;

/// Importance bump applied when an entry is accessed, scaled down as the
/// access count grows: `importance += REINFORCEMENT_BOOST / (1 + 0.1 * count)`.
pub const REINFORCEMENT_BOOST: f64 = 0.1;

/// Ceiling on importance growth from access reinforcement. Feedback
/// outcomes use the wider [`IMPORTANCE_MIN`]..[`IMPORTANCE_MAX`] clamp.
pub const REINFORCEMENT_IMPORTANCE_CAP: f64 = 2.0;

/// Access-count reinforcement in search scoring saturates here:
/// `1 + min(access_count, 50) * 0.01` tops out at 1.5×.
pub const REINFORCE_COUNT_CAP: u64 = 50;
pub const REINFORCE_STEP: f64 = 0.01;

// =============================================================================
// SEARCH (BM25)
// =============================================================================

/// BM25 term-frequency saturation. Standard value; higher weights raw
/// frequency more heavily.
pub const BM25_K1: f64 = 1.5;

/// BM25 length normalization (0 = none, 1 = full). Standard value.
pub const BM25_B: f64 = 0.75;

/// Multiplier when the query appears as an exact consecutive phrase.
pub const PHRASE_BOOST: f64 = 1.5;

/// Multiplier when any query term appears in the entry's tags.
pub const TAG_BOOST: f64 = 1.2;

/// Multiplier when any query term appears in the entry's source.
pub const SOURCE_BOOST: f64 = 1.1;

/// Minimum token length kept by the tokenizer.
pub const MIN_TOKEN_LEN: usize = 2;

/// Default result limit for `search()`.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Weights of the hybrid blend when an embedder is registered:
/// `0.4 * normalized_bm25 + 0.6 * cosine`.
pub const HYBRID_LEXICAL_WEIGHT: f64 = 0.4;
pub const HYBRID_SEMANTIC_WEIGHT: f64 = 0.6;

// =============================================================================
// INGEST & FEEDBACK
// =============================================================================

/// Entries shorter than this are silently dropped at ingest.
pub const MIN_CONTENT_LEN: usize = 15;

/// Importance multiplier for a "good" retrieval outcome.
pub const OUTCOME_GOOD_MULT: f64 = 1.2;

/// Importance multiplier for a "bad" retrieval outcome.
pub const OUTCOME_BAD_MULT: f64 = 0.8;

/// Clamp range for importance after outcome feedback.
pub const IMPORTANCE_MIN: f64 = 0.01;
pub const IMPORTANCE_MAX: f64 = 100.0;

/// Content length at which gated input is classified P2 (contextual) even
/// without any keyword match.
pub const P2_LENGTH_THRESHOLD: usize = 40;

// =============================================================================
// DURABILITY & CONCURRENCY
// =============================================================================

/// WAL records appended before an automatic flush.
pub const WAL_FLUSH_COUNT: usize = 50;

/// WAL file size that also triggers an automatic flush.
pub const WAL_FLUSH_BYTES: u64 = 1_000_000;

/// Shard files larger than this are split candidates for the compactor.
pub const MAX_SHARD_BYTES: u64 = 2_000_000;

/// Age after which a lock with no live holder may be forcibly broken.
pub const STALE_LOCK_AGE_SECS: u64 = 300;

/// Default blocking-acquire timeout for file locks.
pub const LOCK_TIMEOUT_SECS: u64 = 30;

/// Sleep between lock acquisition attempts.
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Retries of the snapshot → modify → check → write loop in `safe_update`.
pub const SAFE_UPDATE_RETRIES: usize = 3;

/// In-memory active-set cap during `bulk_ingest`; exceeding it logs a
/// warning but does not fail the batch.
pub const BULK_ACTIVE_CAP: usize = 20_000;

/// Maximum result sets held by the read cache.
pub const CACHE_MAX_ENTRIES: u64 = 256;

// =============================================================================
// CONSOLIDATION
// =============================================================================

/// Jaccard similarity at which two entries are proposed as near-duplicates.
pub const NEAR_DUP_JACCARD: f64 = 0.85;

/// Jaccard similarity forming a cluster edge between same-category entries.
pub const CLUSTER_JACCARD: f64 = 0.4;

/// Significant tokens two entries must share before a negation mismatch is
/// flagged as a potential contradiction.
pub const CONTRADICTION_MIN_SHARED: usize = 2;

/// Tokens this long count as "significant" for consolidation comparisons.
pub const SIGNIFICANT_TOKEN_LEN: usize = 4;
