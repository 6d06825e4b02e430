//! Schema migration from the legacy single-file layout.
//!
//! The legacy layout is one `memory_metadata.json` holding every entry.
//! Migration copies it to `migrations/backup-<ts>.json`, re-shards and
//! re-indexes the entries, records the step in `migrations/history.json`,
//! and removes the legacy file. The legacy format is treated strictly as
//! a one-way input, never read as steady state.
//!
//! Rollback restores the backup and deletes the sharded artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{MemoryError, Result};
use crate::fsio;
use crate::memory::indexes::{IndexManager, INDEX_DIR};
use crate::memory::shards::{ShardKey, ShardManager, SHARD_DIR};
use crate::memory::types::{content_id, MemoryEntry, MemoryType};

pub const LEGACY_FILE: &str = "memory_metadata.json";
pub const MIGRATIONS_DIR: &str = "migrations";
pub const HISTORY_FILE: &str = "history.json";

/// One applied migration, as recorded in the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub operation: String,
    pub migrated_at: DateTime<Utc>,
    pub from_format: String,
    pub to_format: String,
    pub backup_file: String,
    pub migrated_entries: usize,
    pub created_shards: usize,
}

/// Detects and applies the legacy → sharded migration.
#[derive(Debug)]
pub struct MigrationManager {
    workspace: PathBuf,
}

impl MigrationManager {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn legacy_path(&self) -> PathBuf {
        self.workspace.join(LEGACY_FILE)
    }

    fn migrations_dir(&self) -> PathBuf {
        self.workspace.join(MIGRATIONS_DIR)
    }

    fn history_path(&self) -> PathBuf {
        self.migrations_dir().join(HISTORY_FILE)
    }

    /// True when a legacy store exists and should be migrated.
    pub fn needs_migration(&self) -> bool {
        self.legacy_path().exists()
    }

    /// Run the migration. The backup is written before anything else, so
    /// a failure at any later point leaves the workspace recoverable; the
    /// error is surfaced as [`MemoryError::MigrationFailed`].
    pub fn migrate(&self, now: DateTime<Utc>) -> Result<MigrationRecord> {
        let legacy_path = self.legacy_path();
        let legacy: Value = fsio::read_json(&legacy_path)?;

        std::fs::create_dir_all(self.migrations_dir())
            .map_err(|e| MemoryError::io(self.migrations_dir(), e))?;
        let backup_path = self
            .migrations_dir()
            .join(format!("backup-{}.json", now.format("%Y%m%d%H%M%S")));
        std::fs::copy(&legacy_path, &backup_path)
            .map_err(|e| MemoryError::io(&backup_path, e))?;

        match self.apply(&legacy, now, &backup_path) {
            Ok(record) => {
                std::fs::remove_file(&legacy_path)
                    .map_err(|e| MemoryError::io(&legacy_path, e))?;
                info!(
                    entries = record.migrated_entries,
                    shards = record.created_shards,
                    "migrated legacy store to sharded layout"
                );
                Ok(record)
            }
            Err(e) => {
                // The legacy file was never touched; just report, keeping
                // the backup for forensics.
                warn!(error = %e, "migration failed, workspace unchanged");
                Err(MemoryError::MigrationFailed {
                    detail: e.to_string(),
                })
            }
        }
    }

    fn apply(
        &self,
        legacy: &Value,
        now: DateTime<Utc>,
        backup_path: &Path,
    ) -> Result<MigrationRecord> {
        let raw_entries = legacy
            .get("memories")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let entries: Vec<MemoryEntry> = raw_entries.iter().filter_map(parse_legacy_entry).collect();

        let mut shards = ShardManager::new(&self.workspace);
        for entry in &entries {
            shards.mark_dirty(ShardKey::for_entry(entry));
        }
        let created_shards = shards.save_dirty(entries.iter(), &Default::default())?;

        let mut indexes = IndexManager::new();
        indexes.rebuild(entries.iter());
        indexes.save(&self.workspace)?;

        let record = MigrationRecord {
            operation: "migrate".into(),
            migrated_at: now,
            from_format: "legacy-single-file".into(),
            to_format: "sharded-0.4".into(),
            backup_file: backup_path.display().to_string(),
            migrated_entries: entries.len(),
            created_shards,
        };
        self.append_history(&record)?;
        Ok(record)
    }

    /// Restore the newest backup and delete the sharded artifacts.
    /// Returns `false` when there is no migration to roll back.
    pub fn rollback(&self, now: DateTime<Utc>) -> Result<bool> {
        let history = self.history()?;
        let last = match history.iter().rev().find(|r| r.operation == "migrate") {
            Some(record) => record.clone(),
            None => return Ok(false),
        };

        let backup = PathBuf::from(&last.backup_file);
        if !backup.exists() {
            return Err(MemoryError::MigrationFailed {
                detail: format!("backup file {} is missing", backup.display()),
            });
        }

        std::fs::copy(&backup, self.legacy_path())
            .map_err(|e| MemoryError::io(self.legacy_path(), e))?;

        for artifact in [SHARD_DIR, INDEX_DIR] {
            let dir = self.workspace.join(artifact);
            if dir.exists() {
                std::fs::remove_dir_all(&dir).map_err(|e| MemoryError::io(&dir, e))?;
            }
        }

        self.append_history(&MigrationRecord {
            operation: "rollback".into(),
            migrated_at: now,
            from_format: last.to_format,
            to_format: last.from_format,
            backup_file: last.backup_file,
            migrated_entries: last.migrated_entries,
            created_shards: 0,
        })?;
        Ok(true)
    }

    /// All recorded migration steps, oldest first.
    pub fn history(&self) -> Result<Vec<MigrationRecord>> {
        match fsio::read_json(&self.history_path()) {
            Ok(records) => Ok(records),
            Err(MemoryError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn append_history(&self, record: &MigrationRecord) -> Result<()> {
        let mut history = self.history()?;
        history.push(record.clone());
        fsio::write_json(&self.history_path(), &history)
    }
}

/// Decode one legacy entry leniently. Unknown shapes are skipped rather
/// than failing the whole migration; ids are recomputed so migrated
/// entries dedupe identically to fresh ingests.
fn parse_legacy_entry(value: &Value) -> Option<MemoryEntry> {
    let content = value.get("content")?.as_str()?.trim().to_string();
    if content.is_empty() {
        return None;
    }
    let source = value
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let category = value
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("general")
        .to_string();
    let memory_type = value
        .get("memory_type")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        .unwrap_or(MemoryType::Episodic);
    let created = value
        .get("created")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut entry = MemoryEntry {
        id: content_id(&content, &source, &created),
        content,
        source,
        category,
        memory_type,
        created,
        importance: value.get("importance").and_then(Value::as_f64).unwrap_or(1.0),
        confidence: value.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
        tags: Vec::new(),
        sentiment: Default::default(),
        access_count: value.get("access_count").and_then(Value::as_u64).unwrap_or(0),
        last_accessed: value
            .get("last_accessed")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    };

    if let Some(tags) = value.get("tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            entry.add_tag(tag);
        }
    }
    if let Some(sentiment) = value.get("sentiment").and_then(Value::as_object) {
        for (label, score) in sentiment {
            if let Some(score) = score.as_f64() {
                entry.sentiment.insert(label.clone(), score);
            }
        }
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
    }

    fn legacy_doc() -> Value {
        serde_json::json!({
            "version": "0.2.0",
            "memories": [
                {
                    "hash": "abc123def456",
                    "content": "legacy entry about database choices",
                    "source": "notes.md",
                    "category": "strategic",
                    "created": "2025-11-20T10:00:00+00:00",
                    "importance": 1.5,
                    "tags": ["db"]
                },
                {
                    "content": "minimal legacy entry with defaults only"
                }
            ]
        })
    }

    #[test]
    fn fresh_workspace_needs_no_migration() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!MigrationManager::new(dir.path()).needs_migration());
    }

    #[test]
    fn migrate_shards_indexes_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        fsio::write_json(&dir.path().join(LEGACY_FILE), &legacy_doc()).unwrap();

        let manager = MigrationManager::new(dir.path());
        assert!(manager.needs_migration());

        let record = manager.migrate(now()).unwrap();
        assert_eq!(record.migrated_entries, 2);
        assert!(record.created_shards >= 1);

        // Legacy file is gone, backup and shards exist.
        assert!(!dir.path().join(LEGACY_FILE).exists());
        assert!(PathBuf::from(&record.backup_file).exists());
        assert!(dir
            .path()
            .join(SHARD_DIR)
            .join("2025-11-strategic.json")
            .exists());

        // Entries are searchable through the rebuilt index.
        let index = IndexManager::load(dir.path()).unwrap();
        assert_eq!(index.document_frequency("legacy"), 2);

        assert_eq!(manager.history().unwrap().len(), 1);
        assert!(!manager.needs_migration());
    }

    #[test]
    fn legacy_fields_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        fsio::write_json(&dir.path().join(LEGACY_FILE), &legacy_doc()).unwrap();

        MigrationManager::new(dir.path()).migrate(now()).unwrap();

        let shards = ShardManager::new(dir.path());
        let entries = shards.load_all().unwrap();
        let strategic = entries
            .iter()
            .find(|e| e.category == "strategic")
            .expect("migrated strategic entry");
        assert_eq!(strategic.importance, 1.5);
        assert_eq!(strategic.tags, vec!["db"]);
        assert_eq!(strategic.shard_month(), "2025-11");
    }

    #[test]
    fn rollback_restores_legacy_layout() {
        let dir = tempfile::tempdir().unwrap();
        fsio::write_json(&dir.path().join(LEGACY_FILE), &legacy_doc()).unwrap();

        let manager = MigrationManager::new(dir.path());
        manager.migrate(now()).unwrap();
        assert!(manager.rollback(now()).unwrap());

        assert!(dir.path().join(LEGACY_FILE).exists());
        assert!(!dir.path().join(SHARD_DIR).exists());
        assert!(!dir.path().join(INDEX_DIR).exists());

        let history = manager.history().unwrap();
        assert_eq!(history.last().unwrap().operation, "rollback");
    }

    #[test]
    fn rollback_without_migration_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!MigrationManager::new(dir.path()).rollback(now()).unwrap());
    }
}
