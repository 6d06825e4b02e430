//! Retrieval outcome feedback.
//!
//! Callers report whether surfaced memories helped (`good`), did nothing
//! (`neutral`), or misled (`bad`). Importance is multiplied by 1.2 / 1.0 /
//! 0.8 respectively, clamped to `[0.01, 100]`, and every event is appended
//! to `outcomes.jsonl` so the signal survives restarts.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{IMPORTANCE_MAX, IMPORTANCE_MIN, OUTCOME_BAD_MULT, OUTCOME_GOOD_MULT};
use crate::errors::{MemoryError, Result};
use crate::memory::types::MemoryEntry;

pub const OUTCOMES_FILE: &str = "outcomes.jsonl";

/// Retrieval outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeLabel {
    Good,
    Neutral,
    Bad,
}

impl OutcomeLabel {
    fn importance_multiplier(self) -> f64 {
        match self {
            OutcomeLabel::Good => OUTCOME_GOOD_MULT,
            OutcomeLabel::Neutral => 1.0,
            OutcomeLabel::Bad => OUTCOME_BAD_MULT,
        }
    }
}

impl FromStr for OutcomeLabel {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "good" => Ok(OutcomeLabel::Good),
            "neutral" => Ok(OutcomeLabel::Neutral),
            "bad" => Ok(OutcomeLabel::Bad),
            other => Err(MemoryError::InvalidInput(format!(
                "outcome must be good, neutral, or bad, got {other:?}"
            ))),
        }
    }
}

/// Mutate one entry for an outcome. Neutral is a no-op by construction.
pub fn apply_outcome(entry: &mut MemoryEntry, outcome: OutcomeLabel) {
    entry.importance =
        (entry.importance * outcome.importance_multiplier()).clamp(IMPORTANCE_MIN, IMPORTANCE_MAX);
}

/// One line in `outcomes.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub ts: DateTime<Utc>,
    pub memory_ids: Vec<String>,
    pub outcome: OutcomeLabel,
    /// How many of the listed ids were found and mutated.
    pub affected: usize,
}

/// Aggregate statistics over the outcome log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub good: usize,
    pub neutral: usize,
    pub bad: usize,
}

/// Append-only persistence of outcome events.
#[derive(Debug)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(OUTCOMES_FILE),
        }
    }

    pub fn append(&self, event: &OutcomeEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).map_err(|e| MemoryError::serde(&self.path, e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MemoryError::io(&self.path, e))
    }

    /// Most recent events, newest first. Unparsable lines are skipped.
    pub fn history(&self, limit: usize) -> Result<Vec<OutcomeEvent>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::io(&self.path, e)),
        };

        let mut events: Vec<OutcomeEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line.trim()).ok())
            .collect();
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    pub fn stats(&self) -> Result<FeedbackStats> {
        let events = self.history(usize::MAX)?;
        let mut stats = FeedbackStats {
            total: events.len(),
            ..Default::default()
        };
        for event in events {
            match event.outcome {
                OutcomeLabel::Good => stats.good += 1,
                OutcomeLabel::Neutral => stats.neutral += 1,
                OutcomeLabel::Bad => stats.bad += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use chrono::TimeZone;

    fn entry() -> MemoryEntry {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        MemoryEntry::new("feedback target entry content", "test", "general", MemoryType::Fact, created)
    }

    #[test]
    fn good_boosts_bad_reduces_neutral_keeps() {
        let mut e = entry();
        apply_outcome(&mut e, OutcomeLabel::Good);
        assert!((e.importance - 1.2).abs() < 1e-12);

        apply_outcome(&mut e, OutcomeLabel::Neutral);
        assert!((e.importance - 1.2).abs() < 1e-12);

        apply_outcome(&mut e, OutcomeLabel::Bad);
        assert!((e.importance - 0.96).abs() < 1e-12);
    }

    #[test]
    fn importance_clamps_at_bounds() {
        let mut e = entry();
        e.importance = 90.0;
        for _ in 0..20 {
            apply_outcome(&mut e, OutcomeLabel::Good);
        }
        assert_eq!(e.importance, IMPORTANCE_MAX);

        e.importance = 0.02;
        for _ in 0..20 {
            apply_outcome(&mut e, OutcomeLabel::Bad);
        }
        assert_eq!(e.importance, IMPORTANCE_MIN);
    }

    #[test]
    fn label_parsing() {
        assert_eq!("GOOD".parse::<OutcomeLabel>().unwrap(), OutcomeLabel::Good);
        assert_eq!("neutral".parse::<OutcomeLabel>().unwrap(), OutcomeLabel::Neutral);
        assert!("meh".parse::<OutcomeLabel>().is_err());
    }

    #[test]
    fn log_append_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let log = FeedbackLog::new(dir.path());
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        for outcome in [OutcomeLabel::Good, OutcomeLabel::Good, OutcomeLabel::Bad] {
            log.append(&OutcomeEvent {
                ts,
                memory_ids: vec!["id1".into()],
                outcome,
                affected: 1,
            })
            .unwrap();
        }

        let stats = log.stats().unwrap();
        assert_eq!(
            stats,
            FeedbackStats {
                total: 3,
                good: 2,
                neutral: 0,
                bad: 1,
            }
        );
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let log = FeedbackLog::new(dir.path());

        for i in 0..5 {
            log.append(&OutcomeEvent {
                ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, i).unwrap(),
                memory_ids: vec![format!("id{i}")],
                outcome: OutcomeLabel::Neutral,
                affected: 1,
            })
            .unwrap();
        }

        let history = log.history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].memory_ids, vec!["id4"]);
    }
}
