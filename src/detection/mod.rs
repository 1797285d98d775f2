//! # Detection Pipeline
//!
//! The pipeline is the write path of the core. For every inbound event it:
//! resolves the source, runs the rule engine against the source's rolling
//! state, folds in the external AI risk hint, accumulates the score,
//! classifies severity, appends to the source timeline, and lets the alert
//! emitter decide whether a threshold was crossed.
//!
//! `process` is infallible by contract: malformed input degrades to a
//! zero-contribution event, it never aborts the caller's request handling.

pub mod rules;
pub mod state;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::response::sink::AlertSink;
use crate::response::AlertEmitter;
use crate::{EnrichedEvent, RawEvent, Severity, TrapConfig};
use rules::RuleVerdict;
use state::StateStore;

/// Identity bucket for events that carry no source.
const UNKNOWN_SOURCE: &str = "unknown";

/// Orchestrates rule scoring, state mutation, and alerting.
///
/// Safe to share across request-handling threads: per-source mutation
/// serializes on the record lock, and the alert gate is atomic.
pub struct DetectionPipeline {
    store: Arc<StateStore>,
    emitter: AlertEmitter,

    /// Events whose scoring faulted and contributed zero. Surfaced to
    /// logs and this counter only, never to the caller.
    degraded: AtomicU64,
}

impl DetectionPipeline {
    pub fn new(config: &TrapConfig, sink: Box<dyn AlertSink>) -> Self {
        Self {
            store: Arc::new(StateStore::new(&config.detection)),
            emitter: AlertEmitter::new(config.alerts.provider.clone(), sink),
            degraded: AtomicU64::new(0),
        }
    }

    /// The state store, for analytics queries and idle pruning.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Number of events that scored degraded since start.
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Score one event and fold it into its source's state.
    ///
    /// Never fails and never panics on malformed input; the returned
    /// enriched event always reflects the post-update state.
    pub fn process(&self, event: &RawEvent, ai_hint: Option<f64>) -> EnrichedEvent {
        let source_id = event
            .source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string();

        let handle = self.store.get_or_create(&source_id);
        let event_time = parse_event_time(event.timestamp.as_deref());
        let now = Utc::now();

        let mut state = handle.lock();

        // Last-write-wins: an out-of-order event moves last_seen backward.
        state.last_seen = Some(event_time);

        let verdict = match rules::score_event(event, &mut state, now) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!(
                    "[PIPELINE] Scoring degraded for {}: {} (zero contribution applied)",
                    source_id,
                    e,
                );
                self.degraded.fetch_add(1, Ordering::Relaxed);
                RuleVerdict::default()
            }
        };

        let ai_boost = normalize_ai_hint(ai_hint);
        let total_delta = verdict.delta + ai_boost;
        state.score += total_delta;

        for tag in &verdict.tags {
            *state.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        state.attack_type_guess = verdict.guess;

        let severity = Severity::from_score(state.score);

        let enriched = EnrichedEvent {
            source: source_id.clone(),
            time: event_time,
            path: event.path.clone(),
            method: event.method.clone(),
            user_agent: Some(event.effective_user_agent().to_string())
                .filter(|ua| !ua.is_empty()),
            headers: event.headers.clone(),
            query_params: event.query_params.clone(),
            body: event.body.clone(),
            score_delta: total_delta,
            score_total: state.score,
            tags: verdict.tags.clone(),
            attack_type_guess: verdict.guess,
            severity,
            reasons: verdict.reasons.clone(),
            ai_boost,
        };

        state.record_timeline(enriched.clone());

        let score_total = state.score;
        let top_tags = state.top_tags(5);
        drop(state);

        self.emitter.observe(
            &source_id,
            severity,
            score_total,
            verdict.guess,
            top_tags,
            event,
            &verdict.reasons,
            event_time,
        );

        enriched
    }
}

/// Resolve an event's timestamp: RFC 3339 first, then timezone-naive
/// ISO-8601 treated as UTC ('T' or space separated, or date-only at
/// midnight), then processing time.
fn parse_event_time(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return midnight.and_utc();
        }
    }
    Utc::now()
}

/// Normalize the external AI risk hint to an integer boost in [0, 20].
///
/// Hints on [0, 1] scale by 20; hints on (1, 100] scale by 0.2; anything
/// outside both ranges contributes nothing.
fn normalize_ai_hint(hint: Option<f64>) -> i64 {
    let Some(hint) = hint else {
        return 0;
    };
    let boost = if (0.0..=1.0).contains(&hint) {
        (hint * 20.0).round() as i64
    } else if (0.0..=100.0).contains(&hint) {
        (hint * 0.2).round() as i64
    } else {
        0
    };
    boost.clamp(0, 20)
}
