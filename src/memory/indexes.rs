//! Inverted indexes: text, tags, and dates.
//!
//! Three JSON-persisted indexes keep search off the shard files entirely:
//!
//! - **text**: `term -> { id -> term frequency }`, from tokenized content
//! - **tags**: `tag -> set<id>`
//! - **dates**: `YYYY-MM-DD -> set<id>`
//!
//! All in-memory maps are ordered (`BTreeMap`/`BTreeSet`) and posting
//! lists serialize as sorted `[id, tf]` arrays, so rebuilding from an
//! unchanged entry set produces byte-identical files. That makes index
//! diffs reviewable and `rebuild_indexes()` idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::MIN_TOKEN_LEN;
use crate::errors::{MemoryError, Result};
use crate::fsio;
use crate::memory::types::MemoryEntry;

pub const INDEX_DIR: &str = "indexes";
pub const TEXT_INDEX_FILE: &str = "search_index.json";
pub const TAG_INDEX_FILE: &str = "tag_index.json";
pub const DATE_INDEX_FILE: &str = "date_index.json";

/// English stopwords excluded from tokenization. Carried data: extending
/// it changes ranking for every existing workspace.
pub const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "shall", "can",
    "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by", "from",
    "as", "into", "through", "during", "before", "after", "above", "below", "between", "out",
    "off", "over", "under", "again", "further", "then", "once", "here", "there", "when", "where",
    "why", "how", "all", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "don", "now",
    "and", "but", "or", "if", "while", "that", "this", "it", "its", "he", "she", "they", "them",
    "his", "her", "their", "what", "which", "who", "whom", "these", "those", "am", "about",
    "up", "down", "we", "our", "you", "your", "my", "me", "i",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Tokenize on Unicode letter/number boundaries: casefold, keep runs of
/// alphanumerics at least [`MIN_TOKEN_LEN`] chars, drop stopwords and
/// pure digit runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| !is_stopword(t))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// Counts returned by a full rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    pub terms: usize,
    pub tags: usize,
    pub dates: usize,
    pub entries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextIndexDoc {
    version: String,
    /// term → sorted [id, tf] pairs
    terms: BTreeMap<String, Vec<(String, u32)>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagIndexDoc {
    version: String,
    tags: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DateIndexDoc {
    version: String,
    dates: BTreeMap<String, BTreeSet<String>>,
}

const SCHEMA_VERSION: &str = "0.4.0";

/// Owner of all three indexes. Mutations happen one entry at a time under
/// the same lock that guards the entry's shard; persistence is explicit.
#[derive(Debug, Default)]
pub struct IndexManager {
    /// term → id → tf
    text: BTreeMap<String, BTreeMap<String, u32>>,
    tags: BTreeMap<String, BTreeSet<String>>,
    dates: BTreeMap<String, BTreeSet<String>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ── mutation ────────────────────────────────────────────────────────

    /// Index one entry across all three indexes.
    pub fn add_entry(&mut self, entry: &MemoryEntry) {
        let mut tf: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(&entry.content) {
            *tf.entry(token).or_insert(0) += 1;
        }
        for (term, count) in tf {
            self.text
                .entry(term)
                .or_default()
                .insert(entry.id.clone(), count);
        }

        for tag in &entry.tags {
            self.tags
                .entry(tag.to_lowercase())
                .or_default()
                .insert(entry.id.clone());
        }

        self.dates
            .entry(entry.date_bucket())
            .or_default()
            .insert(entry.id.clone());
    }

    /// Remove one entry from all three indexes. Empty posting lists are
    /// dropped so the serialized form never accumulates tombstones.
    pub fn remove_entry(&mut self, entry: &MemoryEntry) {
        for token in tokenize(&entry.content) {
            if let Some(postings) = self.text.get_mut(&token) {
                postings.remove(&entry.id);
                if postings.is_empty() {
                    self.text.remove(&token);
                }
            }
        }

        for tag in &entry.tags {
            let key = tag.to_lowercase();
            if let Some(ids) = self.tags.get_mut(&key) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.tags.remove(&key);
                }
            }
        }

        let bucket = entry.date_bucket();
        if let Some(ids) = self.dates.get_mut(&bucket) {
            ids.remove(&entry.id);
            if ids.is_empty() {
                self.dates.remove(&bucket);
            }
        }
    }

    /// Reconstruct everything from the authoritative entry map.
    pub fn rebuild<'a>(&mut self, entries: impl Iterator<Item = &'a MemoryEntry>) -> IndexCounts {
        self.text.clear();
        self.tags.clear();
        self.dates.clear();

        let mut count = 0;
        for entry in entries {
            self.add_entry(entry);
            count += 1;
        }

        IndexCounts {
            terms: self.text.len(),
            tags: self.tags.len(),
            dates: self.dates.len(),
            entries: count,
        }
    }

    // ── lookup ──────────────────────────────────────────────────────────

    /// Posting list for a single term.
    pub fn postings(&self, term: &str) -> Option<&BTreeMap<String, u32>> {
        self.text.get(term)
    }

    /// Number of documents containing `term`.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.text.get(term).map_or(0, |p| p.len())
    }

    /// Union of posting lists for the given tokens: the search candidate
    /// set before filter predicates.
    pub fn candidates(&self, tokens: &[String]) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for token in tokens {
            if let Some(postings) = self.text.get(token) {
                ids.extend(postings.keys().cloned());
            }
        }
        ids
    }

    pub fn ids_for_tag(&self, tag: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(&tag.to_lowercase())
    }

    /// Ids created in `[start, end]` (inclusive, `YYYY-MM-DD` keys).
    pub fn ids_in_date_range(&self, start: &str, end: &str) -> BTreeSet<String> {
        self.dates
            .range(start.to_string()..=end.to_string())
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Tokenized length of each indexed document, plus the average.
    /// Derived from posting lists, so it is always consistent with tf.
    pub fn document_lengths(&self) -> (BTreeMap<String, u32>, f64) {
        let mut lengths: BTreeMap<String, u32> = BTreeMap::new();
        for postings in self.text.values() {
            for (id, tf) in postings {
                *lengths.entry(id.clone()).or_insert(0) += tf;
            }
        }
        let avg = if lengths.is_empty() {
            0.0
        } else {
            lengths.values().map(|&l| l as f64).sum::<f64>() / lengths.len() as f64
        };
        (lengths, avg)
    }

    pub fn vocabulary_size(&self) -> usize {
        self.text.len()
    }

    /// Every id referenced anywhere in the text index. Used at load time
    /// to detect references to entries whose shard is gone.
    pub fn all_ids(&self) -> BTreeSet<&String> {
        self.text.values().flat_map(|postings| postings.keys()).collect()
    }

    // ── persistence ─────────────────────────────────────────────────────

    fn index_dir(workspace: &Path) -> PathBuf {
        workspace.join(INDEX_DIR)
    }

    /// Write all three indexes atomically. Documents carry no timestamps,
    /// so an unchanged entry set always serializes to identical bytes.
    pub fn save(&self, workspace: &Path) -> Result<()> {
        let dir = Self::index_dir(workspace);

        let text_doc = TextIndexDoc {
            version: SCHEMA_VERSION.into(),
            terms: self
                .text
                .iter()
                .map(|(term, postings)| {
                    (
                        term.clone(),
                        postings.iter().map(|(id, tf)| (id.clone(), *tf)).collect(),
                    )
                })
                .collect(),
        };
        fsio::write_json(&dir.join(TEXT_INDEX_FILE), &text_doc)?;

        fsio::write_json(
            &dir.join(TAG_INDEX_FILE),
            &TagIndexDoc {
                version: SCHEMA_VERSION.into(),
                tags: self.tags.clone(),
            },
        )?;

        fsio::write_json(
            &dir.join(DATE_INDEX_FILE),
            &DateIndexDoc {
                version: SCHEMA_VERSION.into(),
                dates: self.dates.clone(),
            },
        )?;

        Ok(())
    }

    /// Load indexes from disk; missing files mean a fresh workspace and
    /// leave that index empty.
    pub fn load(workspace: &Path) -> Result<Self> {
        let dir = Self::index_dir(workspace);
        let mut manager = Self::new();

        match fsio::read_json::<TextIndexDoc>(&dir.join(TEXT_INDEX_FILE)) {
            Ok(doc) => {
                manager.text = doc
                    .terms
                    .into_iter()
                    .map(|(term, pairs)| (term, pairs.into_iter().collect()))
                    .collect();
            }
            Err(MemoryError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        match fsio::read_json::<TagIndexDoc>(&dir.join(TAG_INDEX_FILE)) {
            Ok(doc) => manager.tags = doc.tags,
            Err(MemoryError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        match fsio::read_json::<DateIndexDoc>(&dir.join(DATE_INDEX_FILE)) {
            Ok(doc) => manager.dates = doc.dates,
            Err(MemoryError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        Ok(manager)
    }
}
