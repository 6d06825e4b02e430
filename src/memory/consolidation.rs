//! Offline consolidation: near-duplicates, clusters, contradictions.
//!
//! A consolidation pass is read-only. It produces a report of proposed
//! merges, topic clusters, rule-based contradiction flags, and archive
//! candidates. Applying merges is a separate explicit step (`compact()`
//! with `auto_merge_near_duplicates` enabled).
//!
//! All similarity here is Jaccard overlap of significant token sets.
//! Contradiction detection is rule-based, not inferential: two entries
//! that share vocabulary while exactly one of them negates are flagged
//! for review, nothing more.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{
    CLUSTER_JACCARD, CONTRADICTION_MIN_SHARED, NEAR_DUP_JACCARD, SIGNIFICANT_TOKEN_LEN,
};
use crate::decay::DecayEngine;
use crate::memory::types::MemoryEntry;

/// Negation tokens checked against raw (unfiltered) content words.
const NEGATION_TOKENS: &[&str] = &["not", "never", "no", "without"];

/// A proposed merge between two near-duplicate entries.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicatePair {
    /// Survivor: the entry with the higher `importance * confidence`.
    pub keep_id: String,
    pub merge_id: String,
    pub similarity: f64,
}

/// Connected component of related same-category entries.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub category: String,
    pub ids: Vec<String>,
}

/// A flagged potential contradiction.
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    pub id_a: String,
    pub id_b: String,
    pub shared_tokens: Vec<String>,
}

/// Output of one consolidation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub total: usize,
    pub duplicates: Vec<DuplicatePair>,
    pub clusters: Vec<Cluster>,
    pub contradictions: Vec<Contradiction>,
    /// `(id, decay score)` of entries below the archive threshold.
    pub archive_candidates: Vec<(String, f64)>,
    /// Non-fatal problems encountered mid-pass; successful findings above
    /// are still valid.
    pub errors: Vec<String>,
}

/// Significant tokens: lowercased alphanumeric runs of at least
/// [`SIGNIFICANT_TOKEN_LEN`] chars. Deliberately *not* stopword-filtered:
/// negation words must stay visible to the contradiction rule.
fn significant_tokens(content: &str) -> BTreeSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= SIGNIFICANT_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

fn raw_words(content: &str) -> BTreeSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn has_negation(words: &BTreeSet<String>) -> bool {
    NEGATION_TOKENS.iter().any(|n| words.contains(*n))
}

/// Run a full read-only pass over the given entries.
pub fn run(
    entries: &[&MemoryEntry],
    decay: &DecayEngine,
    now: DateTime<Utc>,
) -> ConsolidationReport {
    let token_sets: Vec<BTreeSet<String>> = entries
        .iter()
        .map(|e| significant_tokens(&e.content))
        .collect();
    let word_sets: Vec<BTreeSet<String>> =
        entries.iter().map(|e| raw_words(&e.content)).collect();

    let mut duplicates = Vec::new();
    let mut contradictions = Vec::new();
    let mut cluster_parent: Vec<usize> = (0..entries.len()).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let similarity = jaccard(&token_sets[i], &token_sets[j]);

            if similarity >= NEAR_DUP_JACCARD {
                let (keep, merge) = if weight(entries[i]) >= weight(entries[j]) {
                    (entries[i], entries[j])
                } else {
                    (entries[j], entries[i])
                };
                duplicates.push(DuplicatePair {
                    keep_id: keep.id.clone(),
                    merge_id: merge.id.clone(),
                    similarity,
                });
            }

            if similarity >= CLUSTER_JACCARD && entries[i].category == entries[j].category {
                let (ri, rj) = (find(&mut cluster_parent, i), find(&mut cluster_parent, j));
                if ri != rj {
                    cluster_parent[ri] = rj;
                }
            }

            let shared: Vec<String> = token_sets[i]
                .intersection(&token_sets[j])
                .cloned()
                .collect();
            if shared.len() >= CONTRADICTION_MIN_SHARED
                && has_negation(&word_sets[i]) != has_negation(&word_sets[j])
            {
                contradictions.push(Contradiction {
                    id_a: entries[i].id.clone(),
                    id_b: entries[j].id.clone(),
                    shared_tokens: shared,
                });
            }
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..entries.len() {
        let root = find(&mut cluster_parent, i);
        components.entry(root).or_default().push(i);
    }
    let mut clusters: Vec<Cluster> = components
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|members| Cluster {
            category: entries[members[0]].category.clone(),
            ids: members.iter().map(|&i| entries[i].id.clone()).collect(),
        })
        .collect();
    clusters.sort_by(|a, b| b.ids.len().cmp(&a.ids.len()).then_with(|| a.ids.cmp(&b.ids)));

    let archive_candidates: Vec<(String, f64)> = entries
        .iter()
        .filter(|e| decay.is_archive_candidate(e, now))
        .map(|e| (e.id.clone(), decay.score(e, now)))
        .collect();

    ConsolidationReport {
        total: entries.len(),
        duplicates,
        clusters,
        contradictions,
        archive_candidates,
        errors: Vec::new(),
    }
}

/// Merge `absorbed` into `survivor`: union tags, take the max access
/// count, keep the higher importance and confidence.
pub fn merge_into(survivor: &mut MemoryEntry, absorbed: &MemoryEntry) {
    for tag in &absorbed.tags {
        survivor.add_tag(tag.clone());
    }
    survivor.access_count = survivor.access_count.max(absorbed.access_count);
    survivor.importance = survivor.importance.max(absorbed.importance);
    survivor.confidence = survivor.confidence.max(absorbed.confidence);
}

fn weight(entry: &MemoryEntry) -> f64 {
    entry.importance * entry.confidence
}
