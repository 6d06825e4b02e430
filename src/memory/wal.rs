//! Write-ahead log for safe, fast ingestion.
//!
//! Ingest and delete operations append a JSON line to
//! `.wal/pending.jsonl` before touching any shard. A flush applies the
//! pending records to shards and indexes, then truncates the log by
//! renaming an empty file over it, so the WAL file never disappears under
//! a concurrent reader.
//!
//! Crash model: a crash between append and flush leaves records to replay
//! on the next load. A crash between shard persist and truncation leaves
//! records that replay idempotently (re-ingesting an existing id bumps its
//! access count only; deleting an absent id is a no-op). Corrupted lines
//! from a mid-write crash are skipped with a warning rather than blocking
//! startup.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{MemoryError, Result};
use crate::memory::types::MemoryEntry;

pub const WAL_DIR: &str = ".wal";
pub const WAL_FILENAME: &str = "pending.jsonl";

/// One logged operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WalOp {
    Ingest { entry: MemoryEntry },
    Delete { id: String },
}

impl WalOp {
    /// Id of the entry this record refers to.
    pub fn entry_id(&self) -> &str {
        match self {
            WalOp::Ingest { entry } => &entry.id,
            WalOp::Delete { id } => id,
        }
    }
}

/// A [`WalOp`] plus its append timestamp, one JSON line on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    #[serde(flatten)]
    pub op: WalOp,
    pub ts: DateTime<Utc>,
}

/// Summary returned by `wal_inspect()`.
#[derive(Debug, Clone, Serialize)]
pub struct WalInfo {
    pub pending: usize,
    pub size_bytes: u64,
    /// Up to three raw pending records for eyeballing.
    pub sample: Vec<Value>,
}

/// Owns the pending WAL file for one workspace.
#[derive(Debug)]
pub struct WalManager {
    wal_path: PathBuf,
    flush_count: usize,
    flush_bytes: u64,
    write_count: usize,
}

impl WalManager {
    pub fn new(workspace: &Path, flush_count: usize, flush_bytes: u64) -> Result<Self> {
        let wal_dir = workspace.join(WAL_DIR);
        std::fs::create_dir_all(&wal_dir).map_err(|e| MemoryError::io(&wal_dir, e))?;

        let mut manager = Self {
            wal_path: wal_dir.join(WAL_FILENAME),
            flush_count,
            flush_bytes,
            write_count: 0,
        };
        // Pending records from a previous process count toward flush
        // thresholds immediately.
        manager.write_count = manager.load_pending()?.len();
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }

    // ── write path ──────────────────────────────────────────────────────

    /// Append one record and fsync it, so an acknowledged ingest survives
    /// a crash before the next flush.
    pub fn append(&mut self, op: WalOp, ts: DateTime<Utc>) -> Result<()> {
        let record = WalRecord { op, ts };
        let mut line =
            serde_json::to_string(&record).map_err(|e| MemoryError::serde(&self.wal_path, e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
            .map_err(|e| MemoryError::io(&self.wal_path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MemoryError::io(&self.wal_path, e))?;
        file.sync_data()
            .map_err(|e| MemoryError::io(&self.wal_path, e))?;

        self.write_count += 1;
        Ok(())
    }

    // ── read path ───────────────────────────────────────────────────────

    /// All valid pending records, in append order. Corrupted lines are
    /// skipped so a crash mid-write never prevents startup.
    pub fn load_pending(&self) -> Result<Vec<WalRecord>> {
        let content = match std::fs::read_to_string(&self.wal_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::io(&self.wal_path, e)),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "skipping corrupted WAL line");
                }
            }
        }
        Ok(records)
    }

    // ── maintenance ─────────────────────────────────────────────────────

    /// Atomically truncate the log after a successful flush.
    pub fn truncate(&mut self) -> Result<()> {
        let dir = self.wal_path.parent().expect("wal path has a parent");
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MemoryError::io(dir, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| MemoryError::io(&self.wal_path, e))?;
        tmp.persist(&self.wal_path)
            .map_err(|e| MemoryError::io(&self.wal_path, e.error))?;

        self.write_count = 0;
        debug!(wal = %self.wal_path.display(), "WAL truncated");
        Ok(())
    }

    /// Rewrite the log without records referring to the given ids.
    /// Returns how many records were dropped. Used by purge/forget so a
    /// removed entry can never resurrect through replay.
    pub fn retain_excluding(&mut self, ids: &std::collections::HashSet<String>) -> Result<usize> {
        let records = self.load_pending()?;
        let kept: Vec<&WalRecord> = records
            .iter()
            .filter(|r| !ids.contains(r.op.entry_id()))
            .collect();
        let dropped = records.len() - kept.len();
        if dropped == 0 {
            return Ok(0);
        }

        let dir = self.wal_path.parent().expect("wal path has a parent");
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MemoryError::io(dir, e))?;
        for record in &kept {
            let mut line = serde_json::to_string(record)
                .map_err(|e| MemoryError::serde(&self.wal_path, e))?;
            line.push('\n');
            tmp.write_all(line.as_bytes())
                .map_err(|e| MemoryError::io(&self.wal_path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| MemoryError::io(&self.wal_path, e))?;
        tmp.persist(&self.wal_path)
            .map_err(|e| MemoryError::io(&self.wal_path, e.error))?;

        self.write_count = kept.len();
        Ok(dropped)
    }

    // ── introspection ───────────────────────────────────────────────────

    pub fn pending_count(&self) -> usize {
        self.write_count
    }

    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0)
    }

    /// True when either flush threshold has been crossed.
    pub fn should_flush(&self) -> bool {
        self.write_count >= self.flush_count || self.size_bytes() >= self.flush_bytes
    }

    pub fn inspect(&self) -> Result<WalInfo> {
        let records = self.load_pending()?;
        let sample = records
            .iter()
            .take(3)
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect();
        Ok(WalInfo {
            pending: records.len(),
            size_bytes: self.size_bytes(),
            sample,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    fn sample_entry(content: &str) -> MemoryEntry {
        MemoryEntry::new(content, "test", "general", MemoryType::Episodic, ts())
    }

    fn manager(dir: &Path) -> WalManager {
        WalManager::new(dir, 50, 1_000_000).unwrap()
    }

    #[test]
    fn append_and_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());

        let a = sample_entry("first appended entry content");
        let b = sample_entry("second appended entry content");
        wal.append(WalOp::Ingest { entry: a.clone() }, ts()).unwrap();
        wal.append(WalOp::Delete { id: b.id.clone() }, ts()).unwrap();

        let records = wal.load_pending().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0].op, WalOp::Ingest { entry } if entry.id == a.id));
        assert!(matches!(&records[1].op, WalOp::Delete { id } if *id == b.id));
    }

    #[test]
    fn line_schema_matches_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());
        wal.append(
            WalOp::Ingest {
                entry: sample_entry("wire format check content"),
            },
            ts(),
        )
        .unwrap();

        let raw = std::fs::read_to_string(wal.path()).unwrap();
        let value: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(value["op"], "ingest");
        assert!(value["entry"]["hash"].is_string());
        assert!(value["ts"].is_string());
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());
        wal.append(
            WalOp::Ingest {
                entry: sample_entry("survives the corrupted neighbour"),
            },
            ts(),
        )
        .unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(wal.path()).unwrap();
        file.write_all(b"{\"op\":\"ingest\",\"entry\":{tru").unwrap();
        drop(file);

        let records = wal.load_pending().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn pending_count_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut wal = manager(dir.path());
            wal.append(
                WalOp::Ingest {
                    entry: sample_entry("entry pending across restart"),
                },
                ts(),
            )
            .unwrap();
        }
        let reopened = manager(dir.path());
        assert_eq!(reopened.pending_count(), 1);
    }

    #[test]
    fn truncate_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());
        wal.append(
            WalOp::Ingest {
                entry: sample_entry("entry removed by truncation"),
            },
            ts(),
        )
        .unwrap();

        wal.truncate().unwrap();
        assert!(wal.path().exists());
        assert_eq!(wal.pending_count(), 0);
        assert_eq!(wal.size_bytes(), 0);
        assert!(wal.load_pending().unwrap().is_empty());
    }

    #[test]
    fn flush_threshold_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalManager::new(dir.path(), 2, 1_000_000).unwrap();
        assert!(!wal.should_flush());

        wal.append(
            WalOp::Ingest {
                entry: sample_entry("first of two threshold entries"),
            },
            ts(),
        )
        .unwrap();
        assert!(!wal.should_flush());

        wal.append(
            WalOp::Ingest {
                entry: sample_entry("second of two threshold entries"),
            },
            ts(),
        )
        .unwrap();
        assert!(wal.should_flush());
    }

    #[test]
    fn retain_excluding_drops_matching_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());

        let keep = sample_entry("record that stays in the log");
        let drop_me = sample_entry("record purged from the log");
        wal.append(WalOp::Ingest { entry: keep.clone() }, ts()).unwrap();
        wal.append(WalOp::Ingest { entry: drop_me.clone() }, ts()).unwrap();

        let mut ids = HashSet::new();
        ids.insert(drop_me.id.clone());
        let dropped = wal.retain_excluding(&ids).unwrap();
        assert_eq!(dropped, 1);

        let records = wal.load_pending().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].op.entry_id(), keep.id);
        assert_eq!(wal.pending_count(), 1);
    }

    #[test]
    fn inspect_reports_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = manager(dir.path());
        let info = wal.inspect().unwrap();
        assert_eq!(info.pending, 0);
        assert!(info.sample.is_empty());

        for i in 0..5 {
            wal.append(
                WalOp::Ingest {
                    entry: sample_entry(&format!("inspect sample entry number {i}")),
                },
                ts(),
            )
            .unwrap();
        }
        let info = wal.inspect().unwrap();
        assert_eq!(info.pending, 5);
        assert_eq!(info.sample.len(), 3);
        assert!(info.size_bytes > 0);
    }
}
