//! Sharded entry storage.
//!
//! Every entry belongs to exactly one shard keyed by
//! `(YYYY-MM of created, category)`, persisted as a single JSON document
//! under `shards/<YYYY-MM>-<category>.json`. Shards plus the WAL are the
//! durable truth; indexes are derived state.
//!
//! Saves are dirty-tracked: only shards touched since the last persist are
//! rewritten, atomically. Shard files above the configured size are
//! reported as split candidates by the compactor, never split
//! mid-operation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{MemoryError, Result};
use crate::fsio;
use crate::memory::types::MemoryEntry;

pub const SHARD_DIR: &str = "shards";

/// `(month, category)` shard identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey {
    pub month: String,
    pub category: String,
}

impl ShardKey {
    pub fn for_entry(entry: &MemoryEntry) -> Self {
        Self {
            month: entry.shard_month(),
            category: entry.category.clone(),
        }
    }

    pub fn filename(&self) -> String {
        format!("{}-{}.json", self.month, self.category)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShardDoc {
    version: String,
    month: String,
    category: String,
    count: usize,
    memories: Vec<MemoryEntry>,
}

const SCHEMA_VERSION: &str = "0.4.0";

/// Routes entries to shard files and persists dirty shards.
#[derive(Debug)]
pub struct ShardManager {
    shards_dir: PathBuf,
    dirty: BTreeSet<ShardKey>,
}

impl ShardManager {
    pub fn new(workspace: &Path) -> Self {
        Self {
            shards_dir: workspace.join(SHARD_DIR),
            dirty: BTreeSet::new(),
        }
    }

    pub fn shard_path(&self, key: &ShardKey) -> PathBuf {
        self.shards_dir.join(key.filename())
    }

    /// Mark a shard as needing persistence on the next save.
    pub fn mark_dirty(&mut self, key: ShardKey) {
        self.dirty.insert(key);
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Group entries by shard key.
    pub fn partition<'a>(
        entries: impl Iterator<Item = &'a MemoryEntry>,
    ) -> BTreeMap<ShardKey, Vec<&'a MemoryEntry>> {
        let mut groups: BTreeMap<ShardKey, Vec<&MemoryEntry>> = BTreeMap::new();
        for entry in entries {
            groups.entry(ShardKey::for_entry(entry)).or_default().push(entry);
        }
        groups
    }

    /// Persist every dirty shard, then clear the dirty set.
    ///
    /// Each dirty shard is merged with its on-disk content before the
    /// write: entries present on disk but unknown to this instance (a
    /// cooperating writer's work) are preserved unless they appear in
    /// `tombstones` (ids this instance deliberately removed). Writers
    /// ingesting disjoint content therefore never clobber each other. A
    /// dirty shard left with no entries has its file removed.
    pub fn save_dirty<'a>(
        &mut self,
        entries: impl Iterator<Item = &'a MemoryEntry> + Clone,
        tombstones: &std::collections::HashSet<String>,
    ) -> Result<usize> {
        if self.dirty.is_empty() {
            return Ok(0);
        }

        let live_ids: std::collections::HashSet<&str> =
            entries.clone().map(|e| e.id.as_str()).collect();
        let groups = Self::partition(entries);
        let dirty = std::mem::take(&mut self.dirty);
        let saved = dirty.len();

        for key in dirty {
            let mut memories: Vec<MemoryEntry> = groups
                .get(&key)
                .map(|group| group.iter().map(|e| (*e).clone()).collect())
                .unwrap_or_default();

            for existing in self.load_shard(&key)? {
                if !live_ids.contains(existing.id.as_str()) && !tombstones.contains(&existing.id) {
                    memories.push(existing);
                }
            }

            if memories.is_empty() {
                let path = self.shard_path(&key);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(MemoryError::io(path, e)),
                }
            } else {
                self.write_shard(&key, memories)?;
            }
        }

        debug!(shards = saved, "persisted dirty shards");
        Ok(saved)
    }

    fn write_shard(&self, key: &ShardKey, mut memories: Vec<MemoryEntry>) -> Result<()> {
        // Stable on-disk order: newest last, id as the final tiebreaker.
        memories.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        let doc = ShardDoc {
            version: SCHEMA_VERSION.into(),
            month: key.month.clone(),
            category: key.category.clone(),
            count: memories.len(),
            memories,
        };
        fsio::write_json(&self.shard_path(key), &doc)
    }

    /// Load one shard. Missing files yield an empty vec; unparsable files
    /// surface as [`MemoryError::StoreCorrupt`].
    pub fn load_shard(&self, key: &ShardKey) -> Result<Vec<MemoryEntry>> {
        let path = self.shard_path(key);
        match fsio::read_json::<ShardDoc>(&path) {
            Ok(doc) => Ok(doc.memories),
            Err(MemoryError::NotFound { .. }) => Ok(Vec::new()),
            Err(MemoryError::Serde { path, source }) => Err(MemoryError::StoreCorrupt {
                detail: format!("shard {} is unparsable: {source}", path.display()),
            }),
            Err(e) => Err(e),
        }
    }

    /// Load every shard file in the workspace.
    pub fn load_all(&self) -> Result<Vec<MemoryEntry>> {
        let mut all = Vec::new();

        let dir = match std::fs::read_dir(&self.shards_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(all),
            Err(e) => return Err(MemoryError::io(&self.shards_dir, e)),
        };

        let mut paths: Vec<PathBuf> = dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let doc: ShardDoc = match fsio::read_json(&path) {
                Ok(doc) => doc,
                Err(MemoryError::Serde { path, source }) => {
                    return Err(MemoryError::StoreCorrupt {
                        detail: format!("shard {} is unparsable: {source}", path.display()),
                    })
                }
                Err(e) => return Err(e),
            };
            all.extend(doc.memories);
        }

        Ok(all)
    }

    /// Shard files exceeding `max_bytes`: split candidates for the
    /// compactor.
    pub fn oversized_shards(&self, max_bytes: u64) -> Result<Vec<(String, u64)>> {
        let mut oversized = Vec::new();

        let dir = match std::fs::read_dir(&self.shards_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(oversized),
            Err(e) => return Err(MemoryError::io(&self.shards_dir, e)),
        };

        for entry in dir.filter_map(|e| e.ok()) {
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.len() > max_bytes {
                oversized.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }

        oversized.sort();
        Ok(oversized)
    }
}
