//! Agent-likeness scoring and classification.
//!
//! The score is additive and monotonic: rules fire in a fixed order, each
//! rule rewards its reason tag at most once per session, and the total is
//! clamped at 100. Classification is a pure function of the score.

use crate::detectors::DetectorVerdicts;
use crate::request::RequestMetadata;
use crate::session::{IntervalStats, Session};
use serde::{Deserialize, Serialize};

/// Originator classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No analysis has run yet.
    #[default]
    Unknown,
    Human,
    Scraper,
    AiAgent,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Unknown => "unknown",
            Classification::Human => "human",
            Classification::Scraper => "scraper",
            Classification::AiAgent => "ai_agent",
        }
    }

    /// Parse a stored label; anything unrecognized degrades to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "human" => Classification::Human,
            "scraper" => Classification::Scraper,
            "ai_agent" => Classification::AiAgent,
            _ => Classification::Unknown,
        }
    }
}

/// Score thresholds for classification.
const AI_AGENT_THRESHOLD: u8 = 70;
const SCRAPER_THRESHOLD: u8 = 40;

/// Classify a score. Pure: the same score always yields the same class.
pub fn classify(score: u8) -> Classification {
    if score >= AI_AGENT_THRESHOLD {
        Classification::AiAgent
    } else if score >= SCRAPER_THRESHOLD {
        Classification::Scraper
    } else {
        Classification::Human
    }
}

/// Result of scoring one request against its session.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    /// New session score, clamped at 100.
    pub score: u8,
    /// Reason tags added by this analysis (tags already on the session are
    /// never re-awarded).
    pub new_reasons: Vec<String>,
    pub classification: Classification,
}

/// Evaluate the scoring rules for one request.
///
/// `session` is the pre-analysis snapshot; `intervals` must already include
/// the current request's inter-arrival sample.
pub fn evaluate(
    session: &Session,
    meta: &RequestMetadata,
    verdicts: &DetectorVerdicts,
    intervals: &IntervalStats,
) -> ScoreOutcome {
    let updated_count = session.request_count + 1;
    let unique_endpoints = if session.endpoints_called.contains(&meta.path) {
        session.endpoints_called.len()
    } else {
        session.endpoints_called.len() + 1
    };
    let unique_methods = if session.methods_used.contains(&meta.method) {
        session.methods_used.len()
    } else {
        session.methods_used.len() + 1
    };

    // Fixed rule order; each entry is (tag, points, fired).
    let rules: [(&str, u8, bool); 9] = [
        (
            "docs_first",
            20,
            (verdicts.docs_path || verdicts.openapi_path) && session.request_count < 3,
        ),
        ("systematic_probing", 25, unique_endpoints > 5),
        (
            "admin_probing",
            15,
            verdicts.admin_path || verdicts.internal_path,
        ),
        ("sql_injection", 25, verdicts.sql_injection),
        ("bot_user_agent", 15, verdicts.bot_user_agent),
        ("multiple_methods", 15, unique_methods > 2),
        ("honey_token", 30, verdicts.honey_token_triggered()),
        (
            "high_diversity",
            10,
            updated_count > 3
                && unique_endpoints as f64 / updated_count as f64 > 0.7,
        ),
        (
            "regular_intervals",
            25,
            updated_count >= 5
                && intervals
                    .coefficient_of_variation()
                    .is_some_and(|cv| cv < 0.3),
        ),
    ];

    let mut score = session.agent_likeness_score;
    let mut new_reasons = Vec::new();
    for (tag, points, fired) in rules {
        if !fired || session.classification_reasons.contains(tag) {
            continue;
        }
        score = score.saturating_add(points).min(100);
        new_reasons.push(tag.to_string());
    }

    ScoreOutcome {
        score,
        new_reasons,
        classification: classify(score),
    }
}
