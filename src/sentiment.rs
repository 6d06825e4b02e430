//! Keyword-based sentiment tagging.
//!
//! Lightweight tone detection over five labels. Scores are hit counts
//! scaled into `[0, 1]`; three keyword hits saturate a label. The keyword
//! lists are data, not heuristics to re-derive; swapping in a model-based
//! tagger is the upgrade path.

use std::collections::BTreeMap;

/// `(label, keywords)` pairs checked against lowercased content.
const SENTIMENT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "positive",
        &[
            "achieved",
            "breakthrough",
            "complete",
            "success",
            "excellent",
            "great",
            "perfect",
            "working",
            "stable",
            "solved",
            "fixed",
            "improved",
            "love",
            "amazing",
            "brilliant",
            "excited",
            "happy",
            "proud",
            "winning",
            "profit",
            "✅",
            "🎉",
            "🚀",
            "💪",
            "🏆",
            "❤️",
            "😊",
            "👍",
        ],
    ),
    (
        "negative",
        &[
            "failed",
            "broken",
            "crashed",
            "error",
            "bug",
            "lost",
            "frustrated",
            "stuck",
            "blocked",
            "problem",
            "issue",
            "concern",
            "worried",
            "urgent",
            "critical",
            "expensive",
            "overbudget",
            "delayed",
            "missing",
            "❌",
            "🔴",
            "😤",
            "😰",
            "💀",
        ],
    ),
    (
        "urgent",
        &[
            "urgent",
            "asap",
            "immediately",
            "critical",
            "deadline",
            "tonight",
            "right now",
            "emergency",
            "blocking",
            "must",
            "need",
            "⚠️",
            "🚨",
            "⏰",
        ],
    ),
    (
        "strategic",
        &[
            "decision",
            "strategy",
            "plan",
            "approach",
            "architecture",
            "design",
            "pivot",
            "direction",
            "vision",
            "goal",
            "milestone",
            "roadmap",
            "🎯",
            "📋",
            "🗺️",
        ],
    ),
    (
        "financial",
        &[
            "cost",
            "revenue",
            "profit",
            "savings",
            "budget",
            "price",
            "fee",
            "invoice",
            "payment",
            "grant",
            "funding",
            "investment",
            "💰",
            "💵",
            "📈",
            "📉",
        ],
    ),
];

/// Return `label → score` for each detected tone. Labels with no hits are
/// omitted entirely.
pub fn analyze(text: &str) -> BTreeMap<String, f64> {
    let lower = text.to_lowercase();
    let mut scores = BTreeMap::new();

    for (label, keywords) in SENTIMENT_KEYWORDS {
        let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if hits > 0 {
            let score = (hits as f64 / 3.0).min(1.0);
            scores.insert(label.to_string(), (score * 100.0).round() / 100.0);
        }
    }

    scores
}

/// Strongest detected tone, if any.
pub fn dominant(scores: &BTreeMap<String, f64>) -> Option<&str> {
    scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(label, _)| label.as_str())
}
