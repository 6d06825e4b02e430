//! The memory system facade.
//!
//! [`MemorySystem`] owns the in-memory entry map and exclusive write
//! access to every file inside its workspace. The write path is
//! `ingest → gate → normalize → shard assignment → WAL append → in-memory
//! insert → index update → (batched) shard persist`; the read path is
//! `search → tokenize → index lookup → BM25 score → decay weight →
//! (optional) cosine blend → cache → reinforce accessed`.
//!
//! A single instance is not internally synchronized; callers serialize
//! access, and cross-process coordination happens through file locks. The
//! engine spawns no background threads: WAL flush, consolidation, and
//! compaction run only when invoked.

pub mod access;
pub mod cache;
pub mod consolidation;
pub mod feedback;
pub mod forgetting;
pub mod indexes;
pub mod migration;
pub mod namespace;
pub mod search;
pub mod shards;
pub mod types;
pub mod wal;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::decay::DecayEngine;
use crate::embed::Embedder;
use crate::errors::{MemoryError, Result};
use crate::fsio;
use crate::gate::{self, Priority};
use crate::lock::FileLock;
use crate::sentiment;

use access::AccessTracker;
use cache::ReadCache;
use consolidation::ConsolidationReport;
use feedback::{FeedbackLog, FeedbackStats, OutcomeEvent, OutcomeLabel};
use forgetting::{AuditRecord, ForgetCriteria, PurgeCriteria};
use indexes::{IndexCounts, IndexManager};
use migration::MigrationManager;
use namespace::{NamespaceInfo, NamespaceManifest};
use search::{SearchContext, SearchEngine};
use shards::{ShardKey, ShardManager};
use types::{
    DropReason, IngestStatus, MemoryEntry, MemoryType, RemovalReport, SearchOptions, SearchResult,
};
use wal::{WalInfo, WalManager, WalOp};

const EMBEDDINGS_FILE: &str = "embeddings.json";

/// One item of a bulk ingest batch.
#[derive(Debug, Clone)]
pub struct BulkEntry {
    pub content: String,
    pub source: String,
    pub category: String,
    pub memory_type: MemoryType,
}

impl BulkEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: "bulk".into(),
            category: "general".into(),
            memory_type: MemoryType::Episodic,
        }
    }
}

impl From<&str> for BulkEntry {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

impl From<String> for BulkEntry {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

/// Result of a `compact()` pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompactReport {
    pub archived: usize,
    pub merged: usize,
    /// Shard files above the size limit, as `(filename, bytes)`.
    pub split_candidates: Vec<(String, u64)>,
    pub errors: Vec<String>,
}

/// Aggregate counters for `stats()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub categories: BTreeMap<String, usize>,
    pub wal_pending: usize,
    pub vocabulary: usize,
    pub cache_hit_rate: f64,
    pub workspace: PathBuf,
}

/// Single-node persistent memory store over one workspace directory.
pub struct MemorySystem {
    config: MemoryConfig,
    entries: HashMap<String, MemoryEntry>,
    /// `(content, source)` fingerprint → id, for ingest idempotency.
    content_keys: HashMap<String, String>,
    shards: ShardManager,
    wal: WalManager,
    indexes: IndexManager,
    decay: DecayEngine,
    engine: SearchEngine,
    access: AccessTracker,
    cache: ReadCache,
    feedback: FeedbackLog,
    embedder: Option<Arc<dyn Embedder>>,
    embeddings: HashMap<String, Vec<f32>>,
    /// Ids removed since the last flush. Shard merging skips these so a
    /// purged entry cannot resurrect from a cooperating writer's file.
    removed_ids: HashSet<String>,
    bulk_depth: usize,
}

impl MemorySystem {
    /// Open a workspace, migrating a legacy single-file store first if
    /// one is present, then loading shards, indexes, and replaying the
    /// WAL.
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let workspace = config.workspace.clone();
        std::fs::create_dir_all(&workspace).map_err(|e| MemoryError::io(&workspace, e))?;

        let migrator = MigrationManager::new(&workspace);
        if migrator.needs_migration() {
            migrator.migrate(Utc::now())?;
        }

        let wal = WalManager::new(&workspace, config.wal_flush_count, config.wal_flush_bytes)?;
        let mut system = Self {
            shards: ShardManager::new(&workspace),
            wal,
            indexes: IndexManager::new(),
            decay: DecayEngine::new(config.half_life_days, config.archive_threshold),
            engine: SearchEngine::default(),
            access: AccessTracker::load(&workspace),
            cache: ReadCache::new(config.cache_max_entries),
            feedback: FeedbackLog::new(&workspace),
            embedder: None,
            embeddings: HashMap::new(),
            entries: HashMap::new(),
            content_keys: HashMap::new(),
            removed_ids: HashSet::new(),
            bulk_depth: 0,
            config,
        };
        system.load()?;
        Ok(system)
    }

    /// Open while discarding the persisted indexes and rebuilding them
    /// from shards: the recovery path for [`MemoryError::StoreCorrupt`].
    pub fn repair(config: MemoryConfig) -> Result<Self> {
        let index_dir = config.workspace.join(indexes::INDEX_DIR);
        if index_dir.exists() {
            std::fs::remove_dir_all(&index_dir).map_err(|e| MemoryError::io(&index_dir, e))?;
        }
        let mut system = Self::open(config)?;
        system.rebuild_indexes()?;
        Ok(system)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        self.entries.get(id)
    }

    // ── persistence ─────────────────────────────────────────────────────

    /// Load state from disk: shards into the entry map, indexes from
    /// their files (rebuilt when absent), then WAL replay and flush.
    ///
    /// An index that references ids with no backing entry means the shard
    /// a reference points at is gone; that surfaces as `StoreCorrupt` and
    /// [`MemorySystem::repair`] is the way back.
    pub fn load(&mut self) -> Result<usize> {
        self.entries.clear();
        self.content_keys.clear();

        for entry in self.shards.load_all()? {
            self.content_keys
                .insert(content_key(&entry.content, &entry.source), entry.id.clone());
            self.entries.insert(entry.id.clone(), entry);
        }

        self.indexes = IndexManager::load(&self.config.workspace)?;
        if self.indexes.vocabulary_size() == 0 && !self.entries.is_empty() {
            self.indexes.rebuild(self.entries.values());
        } else {
            let dangling: Vec<&String> = self
                .indexes
                .all_ids()
                .into_iter()
                .filter(|id| !self.entries.contains_key(*id))
                .collect();
            if !dangling.is_empty() {
                return Err(MemoryError::StoreCorrupt {
                    detail: format!(
                        "indexes reference {} entries with no backing shard (e.g. {})",
                        dangling.len(),
                        dangling[0]
                    ),
                });
            }

            // The reverse gap is healable: entries another writer flushed
            // into our shards after our last index save just get indexed
            // now.
            let unindexed: Vec<String> = {
                let indexed = self.indexes.all_ids();
                self.entries
                    .keys()
                    .filter(|id| !indexed.contains(id))
                    .cloned()
                    .collect()
            };
            for id in unindexed {
                if let Some(entry) = self.entries.get(&id) {
                    self.indexes.add_entry(entry);
                }
            }
        }

        self.embeddings = match fsio::read_json(
            &self
                .config
                .workspace
                .join(indexes::INDEX_DIR)
                .join(EMBEDDINGS_FILE),
        ) {
            Ok(map) => map,
            Err(MemoryError::NotFound { .. }) => HashMap::new(),
            Err(e) => return Err(e),
        };

        // Replay pending WAL records, then flush so the workspace settles.
        let pending = self.wal.load_pending()?;
        if !pending.is_empty() {
            info!(records = pending.len(), "replaying WAL");
            self.apply_wal_records(&pending);
            self.flush_wal()?;
        }

        self.cache.invalidate();
        debug!(entries = self.entries.len(), "workspace loaded");
        Ok(self.entries.len())
    }

    /// Apply WAL records idempotently: re-ingesting a present id or
    /// deleting an absent one is a no-op, which is what makes replay
    /// crash-safe.
    fn apply_wal_records(&mut self, records: &[wal::WalRecord]) {
        for record in records {
            match &record.op {
                WalOp::Ingest { entry } => {
                    if !self.entries.contains_key(&entry.id) {
                        self.shards.mark_dirty(ShardKey::for_entry(entry));
                        self.indexes.add_entry(entry);
                        self.content_keys
                            .insert(content_key(&entry.content, &entry.source), entry.id.clone());
                        self.entries.insert(entry.id.clone(), entry.clone());
                    }
                }
                WalOp::Delete { id } => {
                    if let Some(entry) = self.entries.remove(id) {
                        self.content_keys
                            .remove(&content_key(&entry.content, &entry.source));
                        self.shards.mark_dirty(ShardKey::for_entry(&entry));
                        self.indexes.remove_entry(&entry);
                    }
                }
            }
        }
    }

    /// Flush: under the shard-set and WAL locks, apply every pending
    /// record from disk (including a cooperating writer's appends),
    /// persist dirty shards and the indexes, then truncate the WAL.
    /// Returns how many pending records were settled. All-or-nothing at
    /// this boundary: a failure before truncation leaves the WAL intact
    /// for replay.
    pub fn flush_wal(&mut self) -> Result<usize> {
        let shard_dir = self.config.workspace.join(shards::SHARD_DIR);
        let _shard_guard = FileLock::acquire(
            &shard_dir,
            self.config.lock_timeout_s,
            self.config.stale_lock_age_s,
        )?;
        let wal_path = self.wal.path().to_path_buf();
        let _wal_guard = FileLock::acquire(
            &wal_path,
            self.config.lock_timeout_s,
            self.config.stale_lock_age_s,
        )?;

        // Re-read from disk: another process may have appended since our
        // last look, and truncation must not lose its records.
        let pending = self.wal.load_pending()?;
        let pending_count = pending.len();
        let unapplied: Vec<wal::WalRecord> = pending
            .into_iter()
            .filter(|r| !self.removed_ids.contains(r.op.entry_id()))
            .collect();
        self.apply_wal_records(&unapplied);

        self.shards
            .save_dirty(self.entries.values(), &self.removed_ids)?;
        self.indexes.save(&self.config.workspace)?;
        self.save_embeddings()?;
        self.wal.truncate()?;
        self.removed_ids.clear();

        debug!(records = pending_count, "WAL flushed");
        Ok(pending_count)
    }

    /// Persist everything: WAL flush plus the access counts.
    pub fn save(&mut self) -> Result<()> {
        self.flush_wal()?;
        self.access
            .save(self.config.lock_timeout_s, self.config.stale_lock_age_s)?;
        Ok(())
    }

    fn save_embeddings(&self) -> Result<()> {
        if self.embeddings.is_empty() {
            return Ok(());
        }
        let ordered: BTreeMap<&String, &Vec<f32>> = self.embeddings.iter().collect();
        fsio::write_json(
            &self
                .config
                .workspace
                .join(indexes::INDEX_DIR)
                .join(EMBEDDINGS_FILE),
            &ordered,
        )
    }

    // ── ingest ──────────────────────────────────────────────────────────

    /// Ingest one entry with an explicit creation timestamp.
    pub fn ingest_at(
        &mut self,
        content: &str,
        source: &str,
        category: &str,
        memory_type: MemoryType,
        created: DateTime<Utc>,
    ) -> Result<IngestStatus> {
        let normalized = content.trim();
        if normalized.chars().count() < self.config.min_content_len {
            return Ok(IngestStatus::Dropped(DropReason::TooShort));
        }

        // Same (content, source) seen before: reinforce, don't duplicate.
        let key = content_key(normalized, source);
        if let Some(id) = self.content_keys.get(&key).cloned() {
            if let Some(existing) = self.entries.get_mut(&id) {
                existing.access_count += 1;
                existing.last_accessed = Some(created);
                self.shards.mark_dirty(ShardKey::for_entry(existing));
                self.cache.invalidate();
                return Ok(IngestStatus::Duplicate(id));
            }
        }

        let mut entry = MemoryEntry::new(normalized, source, category, memory_type, created);
        entry.importance = memory_type.importance_boost();
        entry.sentiment = sentiment::analyze(normalized);
        for tag in self.extract_tags(normalized) {
            entry.add_tag(tag);
        }

        if let Some(embedder) = &self.embedder {
            self.embeddings
                .insert(entry.id.clone(), embedder.embed(&entry.content));
        }

        self.append_wal(WalOp::Ingest {
            entry: entry.clone(),
        })?;

        let id = entry.id.clone();
        self.shards.mark_dirty(ShardKey::for_entry(&entry));
        if self.bulk_depth == 0 {
            self.indexes.add_entry(&entry);
        }
        self.content_keys.insert(key, id.clone());
        self.entries.insert(id.clone(), entry);
        self.cache.invalidate();

        if self.bulk_depth == 0 && self.wal.should_flush() {
            self.flush_wal()?;
        }

        Ok(IngestStatus::Stored(id))
    }

    /// Ingest with the current clock and the default episodic type.
    pub fn ingest(&mut self, content: &str, source: &str, category: &str) -> Result<IngestStatus> {
        self.ingest_at(content, source, category, MemoryType::Episodic, Utc::now())
    }

    pub fn ingest_fact(&mut self, content: &str, source: &str, category: &str) -> Result<IngestStatus> {
        self.ingest_at(content, source, category, MemoryType::Fact, Utc::now())
    }

    pub fn ingest_preference(
        &mut self,
        content: &str,
        source: &str,
        category: &str,
    ) -> Result<IngestStatus> {
        self.ingest_at(content, source, category, MemoryType::Preference, Utc::now())
    }

    pub fn ingest_procedure(
        &mut self,
        content: &str,
        source: &str,
        category: &str,
    ) -> Result<IngestStatus> {
        self.ingest_at(content, source, category, MemoryType::Procedure, Utc::now())
    }

    pub fn ingest_mistake(
        &mut self,
        content: &str,
        source: &str,
        category: &str,
    ) -> Result<IngestStatus> {
        self.ingest_at(content, source, category, MemoryType::Mistake, Utc::now())
    }

    /// Ingest through the P0–P3 gate. P3 content is dropped without any
    /// state change; everything else lands in the category its priority
    /// maps to.
    pub fn ingest_with_gating(&mut self, content: &str, source: &str) -> Result<IngestStatus> {
        let priority = gate::classify(content);
        let category = match priority {
            Priority::P0 => "strategic",
            Priority::P1 => "operational",
            Priority::P2 => "tactical",
            Priority::P3 => return Ok(IngestStatus::Dropped(DropReason::Ephemeral)),
        };
        self.ingest_at(content, source, category, MemoryType::Episodic, Utc::now())
    }

    /// Batch ingest with index maintenance deferred to the end: entries
    /// go to the WAL and the map as usual, then one flush and one index
    /// rebuild cover the whole batch.
    pub fn bulk_ingest<I>(&mut self, items: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<BulkEntry>,
    {
        let mut guard = self.bulk_mode();
        let mut stored = 0;
        for item in items {
            let item = item.into();
            let status = guard.ingest_at(
                &item.content,
                &item.source,
                &item.category,
                item.memory_type,
                Utc::now(),
            )?;
            if status.stored() {
                stored += 1;
            }
            if guard.entries.len() > guard.config.bulk_active_cap {
                warn!(
                    active = guard.entries.len(),
                    cap = guard.config.bulk_active_cap,
                    "bulk ingest exceeded the active-set cap"
                );
            }
        }
        drop(guard);
        Ok(stored)
    }

    /// Scoped bulk mode: incremental index mutation is disabled while the
    /// guard lives, and dropping it rebuilds the indexes and flushes once.
    pub fn bulk_mode(&mut self) -> BulkGuard<'_> {
        self.bulk_depth += 1;
        BulkGuard { system: self }
    }

    fn append_wal(&mut self, op: WalOp) -> Result<()> {
        let wal_path = self.wal.path().to_path_buf();
        let _guard = FileLock::acquire(
            &wal_path,
            self.config.lock_timeout_s,
            self.config.stale_lock_age_s,
        )?;
        self.wal.append(op, Utc::now())
    }

    /// Explicit `@tag` tokens plus configured auto-tag terms found in the
    /// content.
    fn extract_tags(&self, content: &str) -> Vec<String> {
        let lower = content.to_lowercase();
        let mut tags: Vec<String> = Vec::new();

        for word in content.split_whitespace() {
            if let Some(tag) = word.strip_prefix('@') {
                let tag: String = tag
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                if !tag.is_empty() {
                    tags.push(tag.to_lowercase());
                }
            }
        }

        for term in &self.config.tag_terms {
            if lower.contains(&term.to_lowercase()) {
                tags.push(term.to_lowercase());
            }
        }

        tags
    }

    // ── search ──────────────────────────────────────────────────────────

    /// Search with an explicit clock, for deterministic decay scoring.
    pub fn search_at(
        &mut self,
        query: &str,
        opts: &SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchResult>> {
        let fingerprint = ReadCache::fingerprint(query, opts);
        let cached_ids = self.cache.get(&fingerprint);

        let query_embedding = self
            .embedder
            .as_ref()
            .map(|embedder| embedder.embed(query));
        let ctx = SearchContext {
            entries: &self.entries,
            index: &self.indexes,
            decay: &self.decay,
            now,
            query_embedding: query_embedding.as_deref(),
            doc_embeddings: &self.embeddings,
        };

        let results = match cached_ids {
            Some(ids) => {
                let restrict: HashSet<String> = ids.into_iter().collect();
                self.engine.search_within(query, opts, &ctx, &restrict)
            }
            None => self.engine.search(query, opts, &ctx),
        };

        // Reinforce every returned hit, in one batch.
        let hit_ids: Vec<String> = results.iter().map(|r| r.entry.id.clone()).collect();
        for id in &hit_ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.reinforce(now);
                self.shards.mark_dirty(ShardKey::for_entry(entry));
            }
        }
        if !hit_ids.is_empty() {
            self.access
                .record_batch(hit_ids.iter().map(String::as_str), now);
            self.access
                .save(self.config.lock_timeout_s, self.config.stale_lock_age_s)?;
        }

        self.cache.put(fingerprint, hit_ids);
        Ok(results)
    }

    pub fn search(&mut self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.search_at(query, opts, Utc::now())
    }

    // ── feedback ────────────────────────────────────────────────────────

    /// Apply a retrieval outcome to the listed entries and log the event.
    /// Returns how many entries were found and mutated.
    pub fn record_outcome(&mut self, ids: &[String], outcome: OutcomeLabel) -> Result<usize> {
        let mut affected = 0;
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                feedback::apply_outcome(entry, outcome);
                self.shards.mark_dirty(ShardKey::for_entry(entry));
                affected += 1;
            }
        }

        let outcomes_path = self.config.workspace.join(feedback::OUTCOMES_FILE);
        let _guard = FileLock::acquire(
            &outcomes_path,
            self.config.lock_timeout_s,
            self.config.stale_lock_age_s,
        )?;
        self.feedback.append(&OutcomeEvent {
            ts: Utc::now(),
            memory_ids: ids.to_vec(),
            outcome,
            affected,
        })?;
        drop(_guard);

        if affected > 0 {
            self.cache.invalidate();
        }
        Ok(affected)
    }

    pub fn feedback_stats(&self) -> Result<FeedbackStats> {
        self.feedback.stats()
    }

    // ── removal ─────────────────────────────────────────────────────────

    /// Remove entries matching any purge criterion. Removal covers the
    /// map, all three indexes, the access counts, and pending WAL records
    /// referencing the removed ids; one audit record is appended.
    pub fn purge(&mut self, criteria: &PurgeCriteria) -> Result<RemovalReport> {
        if criteria.is_empty() {
            return Ok(RemovalReport::default());
        }
        let matching: Vec<String> = self
            .entries
            .values()
            .filter(|e| criteria.matches(e))
            .map(|e| e.id.clone())
            .collect();
        self.remove_ids("purge", &matching)
    }

    /// Remove entries matching any forget criterion.
    pub fn forget(&mut self, criteria: &ForgetCriteria) -> Result<RemovalReport> {
        if criteria.is_empty() {
            return Ok(RemovalReport::default());
        }
        let matching: Vec<String> = self
            .entries
            .values()
            .filter(|e| criteria.matches(e))
            .map(|e| e.id.clone())
            .collect();
        self.remove_ids("forget", &matching)
    }

    fn remove_ids(&mut self, operation: &str, ids: &[String]) -> Result<RemovalReport> {
        let mut removed_entries = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.remove(id) {
                self.content_keys
                    .remove(&content_key(&entry.content, &entry.source));
                self.shards.mark_dirty(ShardKey::for_entry(&entry));
                self.indexes.remove_entry(&entry);
                self.access.forget(id);
                self.embeddings.remove(id);
                self.removed_ids.insert(id.clone());
                removed_entries.push(entry);
            }
        }

        let id_set: HashSet<String> = ids.iter().cloned().collect();
        let wal_removed = if id_set.is_empty() {
            0
        } else {
            let wal_path = self.wal.path().to_path_buf();
            let _guard = FileLock::acquire(
                &wal_path,
                self.config.lock_timeout_s,
                self.config.stale_lock_age_s,
            )?;
            self.wal.retain_excluding(&id_set)?
        };

        if !removed_entries.is_empty() || wal_removed > 0 {
            forgetting::append_audit(
                &self.config.workspace,
                &AuditRecord::for_removal(operation, &removed_entries, Utc::now()),
            )?;
            self.cache.invalidate();
        }

        Ok(RemovalReport {
            removed: removed_entries.len(),
            wal_removed,
            total: removed_entries.len() + wal_removed,
        })
    }

    // ── maintenance ─────────────────────────────────────────────────────

    /// Read-only consolidation pass over the current entry set.
    pub fn consolidate(&self) -> ConsolidationReport {
        self.consolidate_at(Utc::now())
    }

    pub fn consolidate_at(&self, now: DateTime<Utc>) -> ConsolidationReport {
        let entries: Vec<&MemoryEntry> = self.entries.values().collect();
        consolidation::run(&entries, &self.decay, now)
    }

    /// Compact the store: drop entries decayed below the archive
    /// threshold, optionally apply proposed near-duplicate merges, and
    /// report oversized shard files as split candidates. Errors inside
    /// the pass are collected in the report; successful removals and
    /// merges are not rolled back.
    pub fn compact(&mut self) -> Result<CompactReport> {
        self.compact_at(Utc::now())
    }

    pub fn compact_at(&mut self, now: DateTime<Utc>) -> Result<CompactReport> {
        let report = self.consolidate_at(now);
        let mut errors = Vec::new();

        let archive_ids: Vec<String> =
            report.archive_candidates.iter().map(|(id, _)| id.clone()).collect();
        let archived = match self.remove_ids("compact", &archive_ids) {
            Ok(removal) => removal.removed,
            Err(e) => {
                errors.push(e.to_string());
                0
            }
        };

        let mut merged = 0;
        if self.config.auto_merge_near_duplicates {
            for pair in &report.duplicates {
                let absorbed = match self.entries.get(&pair.merge_id) {
                    Some(entry) => entry.clone(),
                    None => continue,
                };
                if let Some(survivor) = self.entries.get_mut(&pair.keep_id) {
                    consolidation::merge_into(survivor, &absorbed);
                    self.shards.mark_dirty(ShardKey::for_entry(survivor));
                }
                match self.remove_ids("compact-merge", &[pair.merge_id.clone()]) {
                    Ok(_) => merged += 1,
                    Err(e) => errors.push(e.to_string()),
                }
            }
        }

        let split_candidates = self
            .shards
            .oversized_shards(self.config.max_shard_bytes)
            .unwrap_or_else(|e| {
                errors.push(e.to_string());
                Vec::new()
            });

        self.flush_wal()?;
        Ok(CompactReport {
            archived,
            merged,
            split_candidates,
            errors,
        })
    }

    /// Rebuild all three indexes from the entry map and persist them.
    pub fn rebuild_indexes(&mut self) -> Result<IndexCounts> {
        let counts = self.indexes.rebuild(self.entries.values());
        self.indexes.save(&self.config.workspace)?;
        self.cache.invalidate();
        Ok(counts)
    }

    pub fn wal_inspect(&self) -> Result<WalInfo> {
        self.wal.inspect()
    }

    /// Explicit WAL flush; returns the number of settled records.
    pub fn wal_flush(&mut self) -> Result<usize> {
        self.flush_wal()
    }

    // ── embeddings ──────────────────────────────────────────────────────

    /// Register the embedding hook. Entries ingested from now on get
    /// cached document embeddings; pre-existing entries fall back to pure
    /// lexical scoring until re-ingested or backfilled.
    pub fn register_embedder(&mut self, embedder: Arc<dyn Embedder>) {
        self.embedder = Some(embedder);
        self.cache.invalidate();
    }

    /// Compute and cache embeddings for entries that lack one.
    pub fn backfill_embeddings(&mut self) -> Result<usize> {
        let embedder = match &self.embedder {
            Some(e) => Arc::clone(e),
            None => return Ok(0),
        };
        let mut added = 0;
        for (id, entry) in &self.entries {
            if !self.embeddings.contains_key(id) {
                self.embeddings.insert(id.clone(), embedder.embed(&entry.content));
                added += 1;
            }
        }
        if added > 0 {
            self.save_embeddings()?;
            self.cache.invalidate();
        }
        Ok(added)
    }

    // ── namespaces ──────────────────────────────────────────────────────

    /// Open an isolated namespace as a nested store. The namespace is
    /// registered in the manifest and lazily created on first use.
    pub fn namespace(&self, name: &str) -> Result<MemorySystem> {
        namespace::validate_name(name)?;
        let mut manifest = NamespaceManifest::load(&self.config.workspace)?;
        manifest.create(name, Utc::now())?;

        let mut config = self.config.clone();
        config.workspace = namespace::namespace_workspace(&self.config.workspace, name);
        MemorySystem::open(config)
    }

    pub fn create_namespace(&self, name: &str) -> Result<()> {
        namespace::validate_name(name)?;
        let mut manifest = NamespaceManifest::load(&self.config.workspace)?;
        manifest.create(name, Utc::now())?;
        let dir = namespace::namespace_workspace(&self.config.workspace, name);
        std::fs::create_dir_all(&dir).map_err(|e| MemoryError::io(&dir, e))
    }

    pub fn archive_namespace(&self, name: &str) -> Result<()> {
        let mut manifest = NamespaceManifest::load(&self.config.workspace)?;
        manifest.archive(name, Utc::now())
    }

    /// Delete a namespace and its entire sub-workspace.
    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        namespace::validate_name(name)?;
        let mut manifest = NamespaceManifest::load(&self.config.workspace)?;
        manifest.remove(name, Utc::now())?;
        let dir = namespace::namespace_workspace(&self.config.workspace, name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| MemoryError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn list_namespaces(&self) -> Result<Vec<(String, NamespaceInfo)>> {
        Ok(NamespaceManifest::load(&self.config.workspace)?.list_all())
    }

    // ── stats ───────────────────────────────────────────────────────────

    pub fn stats(&self) -> MemoryStats {
        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.entries.values() {
            *categories.entry(entry.category.clone()).or_insert(0) += 1;
        }
        MemoryStats {
            total_entries: self.entries.len(),
            categories,
            wal_pending: self.wal.pending_count(),
            vocabulary: self.indexes.vocabulary_size(),
            cache_hit_rate: self.cache.hit_rate(),
            workspace: self.config.workspace.clone(),
        }
    }
}

/// RAII guard for bulk mode; see [`MemorySystem::bulk_mode`].
pub struct BulkGuard<'a> {
    system: &'a mut MemorySystem,
}

impl std::ops::Deref for BulkGuard<'_> {
    type Target = MemorySystem;
    fn deref(&self) -> &MemorySystem {
        self.system
    }
}

impl std::ops::DerefMut for BulkGuard<'_> {
    fn deref_mut(&mut self) -> &mut MemorySystem {
        self.system
    }
}

impl Drop for BulkGuard<'_> {
    fn drop(&mut self) {
        self.system.bulk_depth -= 1;
        if self.system.bulk_depth == 0 {
            let rebuilt = self
                .system
                .rebuild_indexes()
                .and_then(|_| self.system.flush_wal());
            if let Err(e) = rebuilt {
                warn!(error = %e, "deferred index rebuild after bulk mode failed");
            }
        }
    }
}

/// Fingerprint of `(content, source)` for ingest idempotency, independent
/// of the creation timestamp baked into the entry id.
fn content_key(content: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
