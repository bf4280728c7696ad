//! Behavioral session model.
//!
//! A session stitches together every request from one `(ip, user_agent)`
//! pair separated by less than the sliding timeout. All accumulator fields
//! are commutative (set union, boolean OR, monotonic max) so concurrent
//! analyses of the same session merge without losing signal; only the
//! scalar fields are last-writer-wins.

use crate::score::Classification;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Store key for a session.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SessionKey {
    pub ip: String,
    pub user_agent: String,
}

impl SessionKey {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Running inter-arrival statistics, maintained with Welford's algorithm so
/// the update is exact regardless of how many analyses folded samples in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    /// Number of inter-arrival samples recorded.
    pub samples: i64,
    mean_ms: f64,
    m2: f64,
}

impl IntervalStats {
    /// Rebuild from persisted columns.
    pub fn from_parts(samples: i64, mean_ms: f64, m2: f64) -> Self {
        Self {
            samples,
            mean_ms,
            m2,
        }
    }

    /// Fold one inter-arrival interval (milliseconds) into the stats.
    pub fn record(&mut self, interval_ms: f64) {
        self.samples += 1;
        let delta = interval_ms - self.mean_ms;
        self.mean_ms += delta / self.samples as f64;
        self.m2 += delta * (interval_ms - self.mean_ms);
    }

    /// Mean interval, available once two samples exist.
    pub fn mean_ms(&self) -> Option<f64> {
        (self.samples >= 2).then_some(self.mean_ms)
    }

    /// Coefficient of variation (stddev / mean), available once five samples
    /// exist. A low value means metronome-like request pacing.
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        if self.samples < 5 || self.mean_ms <= 0.0 {
            return None;
        }
        let variance = self.m2 / self.samples as f64;
        Some(variance.sqrt() / self.mean_ms)
    }

    pub fn raw_mean_ms(&self) -> f64 {
        self.mean_ms
    }

    pub fn raw_m2(&self) -> f64 {
        self.m2
    }
}

/// One behavioral session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub ip: String,
    pub user_agent: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub intervals: IntervalStats,
    pub request_count: i64,
    pub endpoints_called: BTreeSet<String>,
    pub methods_used: BTreeSet<String>,
    // Latching flags: once true, never false again.
    pub looked_at_docs: bool,
    pub tried_openapi: bool,
    pub tried_admin: bool,
    pub tried_internal: bool,
    pub systematic_probing: bool,
    pub sql_injection_attempted: bool,
    pub used_honey_token: bool,
    pub agent_likeness_score: u8,
    pub classification: Classification,
    pub classification_reasons: BTreeSet<String>,
}

impl Session {
    /// A brand-new session with zeroed accumulators.
    pub fn fresh(ip: impl Into<String>, user_agent: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip: ip.into(),
            user_agent: user_agent.into(),
            start_time: now,
            last_activity: now,
            end_time: None,
            intervals: IntervalStats::default(),
            request_count: 0,
            endpoints_called: BTreeSet::new(),
            methods_used: BTreeSet::new(),
            looked_at_docs: false,
            tried_openapi: false,
            tried_admin: false,
            tried_internal: false,
            systematic_probing: false,
            sql_injection_attempted: false,
            used_honey_token: false,
            agent_likeness_score: 0,
            classification: Classification::Unknown,
            classification_reasons: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.ip.clone(), self.user_agent.clone())
    }

    /// Whether the session is still inside the sliding activity window.
    /// Strictly less-than: at exactly the timeout the session has expired.
    pub fn is_active(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity < timeout
    }

    /// Merge an analysis diff into this session. Union/OR/max semantics for
    /// accumulators; plain overwrite for the scalar fields.
    pub fn apply(&mut self, diff: &SessionDiff) {
        self.request_count = diff.request_count;
        self.last_activity = diff.last_activity;
        self.intervals = diff.intervals;

        self.endpoints_called.insert(diff.endpoint.clone());
        self.methods_used.insert(diff.method.clone());
        self.classification_reasons
            .extend(diff.new_reasons.iter().cloned());

        self.agent_likeness_score = self.agent_likeness_score.max(diff.score);
        self.classification = diff.classification;

        self.looked_at_docs |= diff.looked_at_docs;
        self.tried_openapi |= diff.tried_openapi;
        self.tried_admin |= diff.tried_admin;
        self.tried_internal |= diff.tried_internal;
        self.sql_injection_attempted |= diff.sql_injection_attempted;
        self.used_honey_token |= diff.used_honey_token;
        // Recomputed from the merged endpoint set so the equivalence
        // |endpoints_called| > 5 holds at all times.
        self.systematic_probing = self.endpoints_called.len() > 5;
    }
}

/// Per-analysis change set for one session.
#[derive(Debug, Clone)]
pub struct SessionDiff {
    pub request_count: i64,
    pub last_activity: DateTime<Utc>,
    pub intervals: IntervalStats,
    pub endpoint: String,
    pub method: String,
    pub new_reasons: Vec<String>,
    pub score: u8,
    pub classification: Classification,
    pub looked_at_docs: bool,
    pub tried_openapi: bool,
    pub tried_admin: bool,
    pub tried_internal: bool,
    pub sql_injection_attempted: bool,
    pub used_honey_token: bool,
}
