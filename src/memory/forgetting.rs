//! Selective deletion: forget and purge matchers plus the audit log.
//!
//! Both operations enumerate matching entries with OR semantics across
//! the provided criteria. The facade owns the actual removal (map,
//! indexes, WAL); this module decides *what* matches and records *that*
//! something was destroyed. Audit records never preserve content, only
//! counts, sources, and categories, so forgetting stays forgetting.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::errors::{MemoryError, Result};
use crate::memory::types::MemoryEntry;

pub const AUDIT_FILE: &str = "memory_audit.jsonl";

/// Criteria for `forget()`. Any single match is enough.
#[derive(Default)]
pub struct ForgetCriteria {
    /// Entity or topic mentioned in content or tags.
    pub entity: Option<String>,
    pub topic: Option<String>,
    /// `YYYY-MM-DD`; entries created strictly before this date match.
    pub before_date: Option<String>,
    pub id: Option<String>,
}

/// Criteria for `purge()`. Any single match is enough.
#[derive(Default)]
pub struct PurgeCriteria {
    /// Source pattern; `*` acts as a glob wildcard.
    pub source: Option<String>,
    /// Case-insensitive content substring.
    pub content_contains: Option<String>,
    /// Arbitrary predicate over entries. A panicking predicate is the
    /// caller's bug; it is not caught here.
    pub predicate: Option<Box<dyn Fn(&MemoryEntry) -> bool>>,
}

impl std::fmt::Debug for PurgeCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeCriteria")
            .field("source", &self.source)
            .field("content_contains", &self.content_contains)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl ForgetCriteria {
    pub fn is_empty(&self) -> bool {
        self.entity.is_none()
            && self.topic.is_none()
            && self.before_date.is_none()
            && self.id.is_none()
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(id) = &self.id {
            if entry.id == *id {
                return true;
            }
        }
        for needle in [&self.entity, &self.topic].into_iter().flatten() {
            let needle = needle.to_lowercase();
            if entry.content.to_lowercase().contains(&needle) {
                return true;
            }
            let tag_text = entry.tags.join(" ").to_lowercase();
            if tag_text.contains(&needle) {
                return true;
            }
        }
        if let Some(before) = &self.before_date {
            if entry.date_bucket().as_str() < before.as_str() {
                return true;
            }
        }
        false
    }
}

impl PurgeCriteria {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.content_contains.is_none() && self.predicate.is_none()
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(pattern) = &self.source {
            if glob_match(pattern, &entry.source) {
                return true;
            }
        }
        if let Some(needle) = &self.content_contains {
            if entry
                .content
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return true;
            }
        }
        if let Some(predicate) = &self.predicate {
            if predicate(entry) {
                return true;
            }
        }
        false
    }
}

/// Match `value` against a pattern where `*` expands to any run of
/// characters. Everything else is literal.
fn glob_match(pattern: &str, value: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for part in pattern.split('*') {
        if !part.is_empty() {
            let _ = write!(regex, "{}", regex::escape(part));
        }
        regex.push_str(".*");
    }
    // One ".*" too many from the trailing split boundary.
    regex.truncate(regex.len() - 2);
    regex.push('$');

    Regex::new(&regex).map(|re| re.is_match(value)).unwrap_or(false)
}

/// One destructive operation, appended to `memory_audit.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
}

impl AuditRecord {
    /// Summarize a batch of removed entries without keeping any content.
    pub fn for_removal(
        operation: &str,
        removed: &[MemoryEntry],
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut sources: Vec<String> = removed.iter().map(|e| e.source.clone()).collect();
        sources.sort();
        sources.dedup();
        let mut categories: Vec<String> = removed.iter().map(|e| e.category.clone()).collect();
        categories.sort();
        categories.dedup();

        Self {
            operation: operation.to_string(),
            timestamp,
            count: removed.len(),
            sources,
            categories,
        }
    }
}

/// Append one audit record as a JSON line.
pub fn append_audit(workspace: &Path, record: &AuditRecord) -> Result<()> {
    let path = workspace.join(AUDIT_FILE);
    let mut line = serde_json::to_string(record).map_err(|e| MemoryError::serde(&path, e))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| MemoryError::io(&path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| MemoryError::io(&path, e))?;

    debug!(operation = %record.operation, count = record.count, "audit record appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use chrono::TimeZone;

    fn entry(content: &str, source: &str) -> MemoryEntry {
        let created = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        MemoryEntry::new(content, source, "general", MemoryType::Episodic, created)
    }

    #[test]
    fn glob_matches_exact_and_wildcard() {
        assert!(glob_match("pipeline:abc", "pipeline:abc"));
        assert!(glob_match("pipeline:*", "pipeline:abc123"));
        assert!(glob_match("*:auto", "openclaw:auto"));
        assert!(!glob_match("pipeline:*", "user:session"));
        assert!(!glob_match("pipeline:abc", "pipeline:abcdef"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        assert!(glob_match("src.(main)*", "src.(main).rs"));
        assert!(!glob_match("src.(main)*", "srcX(main)Y"));
    }

    #[test]
    fn purge_by_source_pattern() {
        let criteria = PurgeCriteria {
            source: Some("pipeline:pipeline_*".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&entry("noise from pipeline ingest", "pipeline:pipeline_abc")));
        assert!(!criteria.matches(&entry("user session content", "user:session_1")));
    }

    #[test]
    fn purge_content_contains_is_case_insensitive() {
        let criteria = PurgeCriteria {
            content_contains: Some("UNTRUSTED METADATA".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&entry("conversation info untrusted metadata block", "p")));
    }

    #[test]
    fn purge_criteria_or_semantics() {
        let criteria = PurgeCriteria {
            source: Some("openclaw:*".into()),
            content_contains: Some("symlink".into()),
            predicate: Some(Box::new(|e| e.content.contains("predicate-marker"))),
        };
        assert!(criteria.matches(&entry("anything at all really", "openclaw:auto")));
        assert!(criteria.matches(&entry("fixed the symlink mismatch", "user:x")));
        assert!(criteria.matches(&entry("hit the predicate-marker here", "user:y")));
        assert!(!criteria.matches(&entry("matches none of the criteria", "user:z")));
    }

    #[test]
    fn forget_by_topic_checks_tags_too() {
        let mut e = entry("completely unrelated content here", "src");
        e.add_tag("project-atlas");
        let criteria = ForgetCriteria {
            topic: Some("atlas".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&e));
    }

    #[test]
    fn forget_before_date() {
        let criteria = ForgetCriteria {
            before_date: Some("2026-04-01".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&entry("created mid march this year", "s")));

        let later = ForgetCriteria {
            before_date: Some("2026-03-15".into()),
            ..Default::default()
        };
        assert!(!later.matches(&entry("created exactly on the boundary", "s")));
    }

    #[test]
    fn audit_record_summarizes_without_content() {
        let removed = vec![
            entry("secret content one to be gone", "pipeline:a"),
            entry("secret content two to be gone", "pipeline:a"),
        ];
        let record = AuditRecord::for_removal("purge", &removed, Utc::now());
        assert_eq!(record.count, 2);
        assert_eq!(record.sources, vec!["pipeline:a"]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret content"));
    }

    #[test]
    fn audit_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let record = AuditRecord::for_removal("forget", &[], Utc::now());
        append_audit(dir.path(), &record).unwrap();
        append_audit(dir.path(), &record).unwrap();

        let content = std::fs::read_to_string(dir.path().join(AUDIT_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
