//! Input gating: P0–P3 priority triage for memory intake.
//!
//! Every candidate string is classified before storage:
//!
//! - **P0** critical: security incidents, errors, financial commitments,
//!   deadlines
//! - **P1** operational: decisions, assignments, technical choices,
//!   meeting outcomes
//! - **P2** contextual: background information, research, documentation
//! - **P3** ephemeral: greetings, acknowledgments, filler
//!
//! P3 content is dropped so small talk never pollutes recall. The pattern
//! sets are carried data; classification order is fixed: P0 → P1 → P3
//! filler → P2 → length. The P3 patterns are anchored at the start of the
//! input, where the P0/P1/P2 signals match anywhere.

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::constants::{MIN_CONTENT_LEN, P2_LENGTH_THRESHOLD};

/// Classification priority, ordered from most to least critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

static P0_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // Security and errors
        r"(?i)(?:security|vulnerability|breach|attack|error|exception|failure|crash)",
        r"(?i)(?:unauthorized|malicious|threat|risk|critical|emergency)",
        r"(?i)(?:password|token|key|secret|credential).*(?:compromised|leaked|exposed)",
        // Financial commitments
        r"(?i)\$[\d,]+(?:\.\d{2})?.*(?:committed?|approved?|agreed?|contracted?|project)",
        r"(?i)(?:budget|payment|invoice|billing).*(?:due|overdue|critical|approved?)",
        r"(?i)(?:legal|contract|agreement|liability|lawsuit)",
        // Deadlines and time-critical
        r"(?i)(?:deadline|due.*date|urgent|asap|immediately)",
        r"(?i)(?:expires?|timeout|cutoff).*(?:today|tomorrow|this week)",
    ])
    .expect("P0 patterns are valid")
});

static P1_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // Decisions and assignments
        r"(?i)(?:decided?|chosen|selected|assigned|delegated)",
        r"(?i)(?:approved?|rejected|implemented|deployed)",
        r"(?i)(?:action.*item|task.*assigned|responsibility)",
        // Technical choices
        r"(?i)(?:technology|architecture|database|framework|library).*(?:choice|decision)",
        r"(?i)(?:api|service|integration|deployment|configuration)",
        // Meeting outcomes
        r"(?i)(?:meeting|discussion|call).*(?:outcome|result|conclusion)",
        r"(?i)(?:agreed|consensus|next.*step|follow.*up)",
    ])
    .expect("P1 patterns are valid")
});

static P2_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)(?:background|context|history|explanation)",
        r"(?i)(?:research|investigation|analysis|findings)",
        r"(?i)(?:documentation|specification|requirements)",
        r"(?i)(?:for.*reference|fyi|note|information)",
    ])
    .expect("P2 patterns are valid")
});

static P3_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // Greetings and social
        r"(?i)^(?:hi|hey|hello|good\s+(?:morning|afternoon|evening))",
        r"(?i)^(?:thanks?(?:\s+you)?|thx|appreciate|cheers)\.?$",
        r"(?i)^thanks?\s+for\s+(?:the|your)\s+\w+\.?$",
        r"(?i)^(?:ok|okay|got\s+it|understood|copy|noted?)\.?$",
        r"(?i)^(?:lol|haha|lmao|nice|cool|awesome|great)(?:\s+that'?s\s+\w+)?\.?$",
        r"(?i)^(?:bye|see\s+you|talk\s+(?:later|soon)|ttyl)\.?$",
        // Acknowledgments and filler
        r"(?i)^(?:yep|yeah|yup|nope|no\s+problem)\.?$",
        r"(?i)^(?:sounds?\s+good|works?\s+for\s+me|agreed?)\.?$",
        r"(?i)^(?:will\s+do|on\s+it|got\s+it)\.?$",
        r"(?i)^(?:that'?s\s+(?:funny|great|nice|cool))\.?$",
        // Single chars, emoticons, etc.
        r"^.{1,3}$",
    ])
    .expect("P3 patterns are valid")
});

/// Classify content priority. Pure: no state, deterministic per input.
pub fn classify(content: &str) -> Priority {
    let text = content.trim();
    if text.len() < 3 {
        return Priority::P3;
    }

    if P0_PATTERNS.is_match(text) {
        return Priority::P0;
    }
    if P1_PATTERNS.is_match(text) {
        return Priority::P1;
    }
    if P3_PATTERNS.is_match(text) {
        return Priority::P3;
    }
    if P2_PATTERNS.is_match(text) {
        return Priority::P2;
    }

    if text.chars().count() < MIN_CONTENT_LEN {
        Priority::P3
    } else if text.chars().count() >= P2_LENGTH_THRESHOLD {
        Priority::P2
    } else {
        Priority::P3
    }
}

/// True when the content is worth storing (anything above P3).
pub fn should_store(content: &str) -> bool {
    classify(content) != Priority::P3
}
