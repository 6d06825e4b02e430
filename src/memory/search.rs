//! Ranked search over the entry map.
//!
//! Scoring combines a BM25 lexical core with multiplicative boosts, decay
//! weighting, access reinforcement, and importance:
//!
//! ```text
//! score(d) = bm25(d, Q) * boosts(d) * decay(d) * reinforce(d) * importance(d)
//! ```
//!
//! Final scores are normalized by the maximum in the result set, so the
//! top hit always has relevance 1.0. When an embedder is registered and a
//! document has a cached embedding, the normalized lexical score is
//! blended with cosine similarity (`0.4 / 0.6`); documents without a
//! cached embedding keep their pure lexical contribution.
//!
//! A search never mutates entries; access reinforcement of returned hits
//! is applied by the facade after ranking.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::constants::{
    BM25_B, BM25_K1, DEFAULT_SEARCH_LIMIT, HYBRID_LEXICAL_WEIGHT, HYBRID_SEMANTIC_WEIGHT,
    PHRASE_BOOST, REINFORCE_COUNT_CAP, REINFORCE_STEP, SOURCE_BOOST, TAG_BOOST,
};
use crate::decay::DecayEngine;
use crate::embed::cosine_similarity;
use crate::memory::indexes::{tokenize, IndexManager};
use crate::memory::types::{MemoryEntry, ScoreBreakdown, SearchOptions, SearchResult};

/// BM25 parameters; standard constants by default.
#[derive(Debug, Clone, Copy)]
pub struct SearchEngine {
    pub k1: f64,
    pub b: f64,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
        }
    }
}

/// Borrowed state a single search runs against.
pub struct SearchContext<'a> {
    pub entries: &'a HashMap<String, MemoryEntry>,
    pub index: &'a IndexManager,
    pub decay: &'a DecayEngine,
    pub now: DateTime<Utc>,
    /// Query embedding, present only when an embedder is registered.
    pub query_embedding: Option<&'a [f32]>,
    /// Cached per-document embeddings keyed by entry id.
    pub doc_embeddings: &'a HashMap<String, Vec<f32>>,
}

impl SearchEngine {
    /// Run the full pipeline: parse → candidate set → score → filter →
    /// rank → normalize → truncate. Returns ranked results; the ids of
    /// returned hits are what the facade reinforces and caches.
    pub fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        self.run(query, opts, ctx, None)
    }

    /// Same pipeline, restricted to a known candidate id set. Used by the
    /// read cache, which stores ranked ids and re-scores them so results
    /// always reflect current access counts and importance.
    pub fn search_within(
        &self,
        query: &str,
        opts: &SearchOptions,
        ctx: &SearchContext<'_>,
        restrict: &std::collections::HashSet<String>,
    ) -> Vec<SearchResult> {
        self.run(query, opts, ctx, Some(restrict))
    }

    fn run(
        &self,
        query: &str,
        opts: &SearchOptions,
        ctx: &SearchContext<'_>,
        restrict: Option<&std::collections::HashSet<String>>,
    ) -> Vec<SearchResult> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let total_docs = ctx.entries.len();
        let (doc_lengths, avg_doc_len) = ctx.index.document_lengths();

        let mut scored: Vec<(f64, SearchResult)> = Vec::new();

        for id in ctx.index.candidates(&query_tokens) {
            if restrict.is_some_and(|ids| !ids.contains(&id)) {
                continue;
            }
            let entry = match ctx.entries.get(&id) {
                Some(e) => e,
                None => continue,
            };
            if !passes_filters(entry, opts) {
                continue;
            }

            let (lexical, matched_terms) =
                self.bm25(entry, &query_tokens, ctx.index, &doc_lengths, avg_doc_len, total_docs);
            if lexical <= 0.0 {
                continue;
            }

            let boosts = field_boosts(entry, &query_tokens);
            let decay = ctx.decay.score(entry, ctx.now);
            let reinforcement =
                1.0 + (entry.access_count.min(REINFORCE_COUNT_CAP) as f64) * REINFORCE_STEP;
            let score = lexical * boosts * decay * reinforcement * entry.importance;

            let breakdown = opts.explain.then(|| ScoreBreakdown {
                lexical,
                boosts,
                decay,
                reinforcement,
                importance: entry.importance,
                semantic: None,
            });

            scored.push((
                score,
                SearchResult {
                    entry: entry.clone(),
                    score,
                    relevance: 0.0,
                    matched_terms,
                    breakdown,
                },
            ));
        }

        let max_score = scored.iter().map(|(s, _)| *s).fold(0.0f64, f64::max);
        if max_score <= 0.0 {
            return Vec::new();
        }

        // Optional hybrid blend over the normalized lexical scores.
        if let Some(query_vec) = ctx.query_embedding {
            for (score, result) in &mut scored {
                let normalized = *score / max_score;
                match ctx.doc_embeddings.get(&result.entry.id) {
                    Some(doc_vec) => {
                        let cosine = cosine_similarity(query_vec, doc_vec).max(0.0);
                        *score = HYBRID_LEXICAL_WEIGHT * normalized
                            + HYBRID_SEMANTIC_WEIGHT * cosine;
                        if let Some(b) = &mut result.breakdown {
                            b.semantic = Some(cosine);
                        }
                    }
                    // No cached embedding: pure lexical contribution.
                    None => *score = normalized,
                }
                result.score = *score;
            }
        }

        let max_final = scored.iter().map(|(s, _)| *s).fold(0.0f64, f64::max);
        if max_final <= 0.0 {
            return Vec::new();
        }
        for (score, result) in &mut scored {
            result.relevance = *score / max_final;
        }

        // Rank by score; ties break by created descending, then id, so
        // ordering is stable across runs.
        scored.sort_by(|(a, ra), (b, rb)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rb.entry.created.cmp(&ra.entry.created))
                .then_with(|| ra.entry.id.cmp(&rb.entry.id))
        });

        let limit = opts.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        scored
            .into_iter()
            .take(limit)
            .map(|(_, result)| result)
            .collect()
    }

    /// BM25 lexical score plus the query terms that matched.
    ///
    /// ```text
    /// Σ_t IDF(t) * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * |d| / avgdl))
    /// IDF(t) = ln((N - df + 0.5) / (df + 0.5) + 1)
    /// ```
    fn bm25(
        &self,
        entry: &MemoryEntry,
        query_tokens: &[String],
        index: &IndexManager,
        doc_lengths: &BTreeMap<String, u32>,
        avg_doc_len: f64,
        total_docs: usize,
    ) -> (f64, Vec<String>) {
        let doc_len = doc_lengths.get(&entry.id).copied().unwrap_or(0) as f64;
        let avgdl = avg_doc_len.max(1.0);

        let mut score = 0.0;
        let mut matched = Vec::new();

        for term in query_tokens {
            let tf = index
                .postings(term)
                .and_then(|p| p.get(&entry.id))
                .copied()
                .unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            matched.push(term.clone());

            let df = index.document_frequency(term) as f64;
            let idf = ((total_docs as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf_norm =
                (tf * (self.k1 + 1.0)) / (tf + self.k1 * (1.0 - self.b + self.b * doc_len / avgdl));
            score += idf * tf_norm;
        }

        (score, matched)
    }
}

fn passes_filters(entry: &MemoryEntry, opts: &SearchOptions) -> bool {
    if let Some(category) = &opts.category {
        if &entry.category != category {
            return false;
        }
    }
    if let Some(memory_type) = opts.memory_type {
        if entry.memory_type != memory_type {
            return false;
        }
    }
    if let Some(min_confidence) = opts.min_confidence {
        if entry.confidence < min_confidence {
            return false;
        }
    }
    true
}

/// Multiplicative field boosts: exact phrase ×1.5, any term in tags ×1.2,
/// any term in source ×1.1. Each boost applies at most once.
fn field_boosts(entry: &MemoryEntry, query_tokens: &[String]) -> f64 {
    let mut boost = 1.0;

    if query_tokens.len() > 1 {
        let content_tokens = tokenize(&entry.content);
        if contains_sequence(&content_tokens, query_tokens) {
            boost *= PHRASE_BOOST;
        }
    }

    if !entry.tags.is_empty() {
        let tag_text = entry.tags.join(" ").to_lowercase();
        if query_tokens.iter().any(|t| tag_text.contains(t.as_str())) {
            boost *= TAG_BOOST;
        }
    }

    let source_lower = entry.source.to_lowercase();
    if query_tokens.iter().any(|t| source_lower.contains(t.as_str())) {
        boost *= SOURCE_BOOST;
    }

    boost
}

/// True when `needle` appears as a consecutive subsequence of `haystack`.
fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        entries: HashMap<String, MemoryEntry>,
        index: IndexManager,
        decay: DecayEngine,
        embeddings: HashMap<String, Vec<f32>>,
    }

    impl Fixture {
        fn new(contents: &[(&str, &str)]) -> Self {
            let mut entries = HashMap::new();
            let mut index = IndexManager::new();
            for (content, source) in contents {
                let entry =
                    MemoryEntry::new(content, source, "general", MemoryType::Episodic, now());
                index.add_entry(&entry);
                entries.insert(entry.id.clone(), entry);
            }
            Self {
                entries,
                index,
                decay: DecayEngine::default(),
                embeddings: HashMap::new(),
            }
        }

        fn ctx(&self) -> SearchContext<'_> {
            SearchContext {
                entries: &self.entries,
                index: &self.index,
                decay: &self.decay,
                now: now(),
                query_embedding: None,
                doc_embeddings: &self.embeddings,
            }
        }
    }

    #[test]
    fn empty_query_returns_nothing() {
        let fx = Fixture::new(&[("postgresql database chosen", "notes")]);
        let results = SearchEngine::default().search("the a of", &SearchOptions::default(), &fx.ctx());
        assert!(results.is_empty());
    }

    #[test]
    fn top_result_relevance_is_exactly_one() {
        let fx = Fixture::new(&[
            ("chose postgresql as our database", "notes"),
            ("api costs five hundred monthly", "billing"),
        ]);
        let results =
            SearchEngine::default().search("database", &SearchOptions::default(), &fx.ctx());
        assert!(!results.is_empty());
        assert_eq!(results[0].relevance, 1.0);
        assert!(results[0].entry.content.contains("postgresql"));
        for r in &results {
            assert!(r.relevance >= 0.0 && r.relevance <= 1.0);
        }
    }

    #[test]
    fn unrelated_document_scores_zero_and_is_absent() {
        let fx = Fixture::new(&[
            ("chose postgresql as our database", "notes"),
            ("api costs five hundred monthly", "billing"),
        ]);
        let results =
            SearchEngine::default().search("database", &SearchOptions::default(), &fx.ctx());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn phrase_boost_outranks_scattered_terms() {
        let fx = Fixture::new(&[
            ("database decision finalized for the quarter", "notes"),
            ("the decision about storage involved one database candidate", "notes"),
        ]);
        let results = SearchEngine::default().search(
            "database decision",
            &SearchOptions::default(),
            &fx.ctx(),
        );
        assert_eq!(results.len(), 2);
        assert!(results[0].entry.content.starts_with("database decision"));
    }

    #[test]
    fn category_filter_excludes_non_matching() {
        let mut fx = Fixture::new(&[("postgresql database chosen", "notes")]);
        // Recreate the single entry under a different category.
        let entry = MemoryEntry::new(
            "mysql database rejected",
            "notes",
            "strategic",
            MemoryType::Episodic,
            now(),
        );
        fx.index.add_entry(&entry);
        fx.entries.insert(entry.id.clone(), entry);

        let opts = SearchOptions {
            category: Some("strategic".into()),
            ..Default::default()
        };
        let results = SearchEngine::default().search("database", &opts, &fx.ctx());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.category, "strategic");
    }

    #[test]
    fn min_confidence_filter() {
        let mut fx = Fixture::new(&[("postgresql database chosen", "notes")]);
        for entry in fx.entries.values_mut() {
            entry.confidence = 0.2;
        }
        let opts = SearchOptions {
            min_confidence: Some(0.5),
            ..Default::default()
        };
        assert!(SearchEngine::default()
            .search("database", &opts, &fx.ctx())
            .is_empty());
    }

    #[test]
    fn access_reinforcement_ranks_hot_entries_higher() {
        let mut fx = Fixture::new(&[
            ("database migration plan alpha", "notes"),
            ("database migration plan beta variant", "notes"),
        ]);
        // Make the longer (otherwise lower-scoring) entry hot.
        let hot_id = fx
            .entries
            .values()
            .find(|e| e.content.contains("beta"))
            .unwrap()
            .id
            .clone();
        fx.entries.get_mut(&hot_id).unwrap().access_count = 50;
        fx.entries.get_mut(&hot_id).unwrap().importance = 1.4;

        let results = SearchEngine::default().search(
            "database migration",
            &SearchOptions::default(),
            &fx.ctx(),
        );
        assert_eq!(results[0].entry.id, hot_id);
    }

    #[test]
    fn explain_attaches_breakdown() {
        let fx = Fixture::new(&[("postgresql database chosen", "notes")]);
        let opts = SearchOptions {
            explain: true,
            ..Default::default()
        };
        let results = SearchEngine::default().search("database", &opts, &fx.ctx());
        let breakdown = results[0].breakdown.as_ref().unwrap();
        assert!(breakdown.lexical > 0.0);
        assert_eq!(breakdown.importance, 1.0);
        assert!(breakdown.semantic.is_none());
        assert_eq!(results[0].matched_terms, vec!["database"]);
    }

    #[test]
    fn hybrid_blend_prefers_semantically_close_doc() {
        let mut fx = Fixture::new(&[
            ("database planning session notes", "notes"),
            ("database planning session recap", "notes"),
        ]);
        let (close_id, far_id) = {
            let mut ids = fx.entries.keys().cloned().collect::<Vec<_>>();
            ids.sort();
            (ids[0].clone(), ids[1].clone())
        };
        fx.embeddings.insert(close_id.clone(), vec![1.0, 0.0]);
        fx.embeddings.insert(far_id, vec![0.0, 1.0]);

        let query_vec = vec![1.0, 0.0];
        let ctx = SearchContext {
            query_embedding: Some(&query_vec),
            entries: &fx.entries,
            index: &fx.index,
            decay: &fx.decay,
            now: now(),
            doc_embeddings: &fx.embeddings,
        };
        let results =
            SearchEngine::default().search("database planning", &SearchOptions::default(), &ctx);
        assert_eq!(results[0].entry.id, close_id);
        assert_eq!(results[0].relevance, 1.0);
    }

    #[test]
    fn limit_truncates() {
        let fx = Fixture::new(&[
            ("database entry one about storage", "a"),
            ("database entry two about storage", "b"),
            ("database entry three about storage", "c"),
        ]);
        let opts = SearchOptions {
            limit: Some(2),
            ..Default::default()
        };
        let results = SearchEngine::default().search("database", &opts, &fx.ctx());
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn tie_break_is_stable_by_id() {
        let fx = Fixture::new(&[
            ("identical scoring entry about databases", "same"),
            ("identical scoring entry about databases!", "same"),
        ]);
        let first = SearchEngine::default().search("databases", &SearchOptions::default(), &fx.ctx());
        let second =
            SearchEngine::default().search("databases", &SearchOptions::default(), &fx.ctx());
        let order_a: Vec<_> = first.iter().map(|r| r.entry.id.clone()).collect();
        let order_b: Vec<_> = second.iter().map(|r| r.entry.id.clone()).collect();
        assert_eq!(order_a, order_b);
    }
}
