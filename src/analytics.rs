//! # Analytics
//!
//! Read-only projections over the state store for reporting and other
//! consumers. Every query is pure and side-effect-free: unknown sources
//! yield a documented zero-value projection, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::detection::state::StateStore;
use crate::{AttackType, EnrichedEvent, Severity};

/// One leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub id: String,
    pub score: i64,
    pub severity: Severity,
    pub last_seen: Option<DateTime<Utc>>,
    pub attack_type_guess: AttackType,
    pub top_tags: Vec<String>,
}

/// Full projection of a single source, timeline included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub id: String,
    pub score: i64,
    pub severity: Severity,
    pub last_seen: Option<DateTime<Utc>>,
    pub attack_type_guess: AttackType,
    pub top_tags: Vec<String>,
    pub timeline: Vec<EnrichedEvent>,
}

/// Aggregate counters across all tracked sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_sources: usize,
    /// Sources per severity tier, keyed by label.
    pub by_severity: HashMap<String, usize>,
    /// Sources per attack-type guess, keyed by label.
    pub by_attack_type: HashMap<String, usize>,
    /// Timeline events retained across all sources.
    pub total_events: usize,
}

/// Top attackers by accumulated score.
///
/// Sorted by score descending; ties break on source id ascending so the
/// ordering is deterministic.
pub fn leaderboard(store: &StateStore, limit: usize) -> Vec<LeaderboardRow> {
    let mut rows: Vec<LeaderboardRow> = store
        .snapshot()
        .into_iter()
        .map(|(id, handle)| {
            let state = handle.lock();
            LeaderboardRow {
                id,
                score: state.score,
                severity: Severity::from_score(state.score),
                last_seen: state.last_seen,
                attack_type_guess: state.attack_type_guess,
                top_tags: state.top_tags(5),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    rows.truncate(limit);
    rows
}

/// Detailed view of one source.
///
/// Unknown ids return a zero-value projection (score 0, info severity,
/// empty timeline) rather than failing.
pub fn source_summary(store: &StateStore, id: &str) -> SourceSummary {
    match store.get(id) {
        Some(handle) => {
            let state = handle.lock();
            SourceSummary {
                id: id.to_string(),
                score: state.score,
                severity: Severity::from_score(state.score),
                last_seen: state.last_seen,
                attack_type_guess: state.attack_type_guess,
                top_tags: state.top_tags(10),
                timeline: state.timeline.iter().cloned().collect(),
            }
        }
        None => SourceSummary {
            id: id.to_string(),
            score: 0,
            severity: Severity::Info,
            last_seen: None,
            attack_type_guess: AttackType::Unknown,
            top_tags: Vec::new(),
            timeline: Vec::new(),
        },
    }
}

/// Aggregate statistics across all sources.
pub fn global_stats(store: &StateStore) -> GlobalStats {
    let mut by_severity: HashMap<String, usize> = HashMap::new();
    for sev in [Severity::Info, Severity::Warn, Severity::Critical] {
        by_severity.insert(sev.as_str().to_string(), 0);
    }
    let mut by_attack_type: HashMap<String, usize> = HashMap::new();
    let mut total_events = 0;

    let snapshot = store.snapshot();
    let total_sources = snapshot.len();
    for (_, handle) in snapshot {
        let state = handle.lock();
        let sev = Severity::from_score(state.score);
        *by_severity.entry(sev.as_str().to_string()).or_insert(0) += 1;
        *by_attack_type
            .entry(state.attack_type_guess.as_str().to_string())
            .or_insert(0) += 1;
        total_events += state.timeline.len();
    }

    GlobalStats {
        total_sources,
        by_severity,
        by_attack_type,
        total_events,
    }
}
