//! # Alert Emitter
//!
//! Decides when a source's severity change warrants an alert and hands the
//! record to the configured sink.
//!
//! The gate keys on severity *transitions*, not levels: a source gets at
//! most one alert when it first reaches warn-or-above and at most one more
//! when it reaches critical. Sustained critical behavior stays silent, so
//! a source hammering the honeypot cannot flood the alert channel.
//!
//! The last-severity map lives here (not in the state store) and resets on
//! process restart.

pub mod sink;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::{
    AlertEvidence, AlertRecord, AttackType, RawEvent, ScoreReasons, Severity,
};
use sink::AlertSink;

/// Emits alerts on upward severity transitions, deduplicated per source.
pub struct AlertEmitter {
    provider: String,

    /// Last severity observed per source. The decision and the update
    /// happen under one lock so two racing requests from the same source
    /// cannot both see the pre-transition value and double-alert.
    last_severity: Mutex<HashMap<String, Severity>>,

    sink: Box<dyn AlertSink>,
}

impl AlertEmitter {
    pub fn new(provider: impl Into<String>, sink: Box<dyn AlertSink>) -> Self {
        Self {
            provider: provider.into(),
            last_severity: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Record the new severity for a source and emit an alert if it
    /// crossed a threshold upward. Returns whether an alert was emitted.
    ///
    /// Sink failures are logged and swallowed; scoring must never stall on
    /// an unwritable alert channel.
    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &self,
        source_id: &str,
        severity: Severity,
        score: i64,
        guess: AttackType,
        top_tags: Vec<String>,
        event: &RawEvent,
        reasons: &ScoreReasons,
        event_time: DateTime<Utc>,
    ) -> bool {
        let should_emit = {
            let mut last = self.last_severity.lock();
            let prev = last.get(source_id).copied().unwrap_or(Severity::Info);

            // A source's real severity is monotone (scores only go up), so
            // an observation below the recorded value is a stale reordering
            // from a racing request. It must not regress the gate, or the
            // next event would re-fire an already-emitted transition.
            if severity < prev {
                return false;
            }

            let crossed_warn = prev == Severity::Info && severity >= Severity::Warn;
            let crossed_crit = prev != Severity::Critical && severity == Severity::Critical;

            last.insert(source_id.to_string(), severity);

            crossed_warn || crossed_crit
        };

        if !should_emit {
            return false;
        }

        let record = AlertRecord {
            provider: self.provider.clone(),
            source_id: source_id.to_string(),
            severity,
            score,
            attack_type_guess: guess,
            top_tags,
            evidence: AlertEvidence {
                last_path: event.path.clone(),
                last_method: event.method.clone(),
                last_user_agent: Some(event.effective_user_agent().to_string())
                    .filter(|ua| !ua.is_empty()),
                last_reasons: reasons.clone(),
            },
            time: event_time,
            emitted_at: Utc::now(),
        };

        log::warn!(
            "[ALERT] {} crossed into {} (score {}, guess {})",
            source_id,
            severity,
            score,
            guess,
        );

        if let Err(e) = self.sink.deliver(&record) {
            log::error!("[ALERT] Sink delivery failed for {}: {}", source_id, e);
        }

        true
    }

    /// Last severity recorded for a source (info for unseen sources).
    pub fn last_severity(&self, source_id: &str) -> Severity {
        self.last_severity
            .lock()
            .get(source_id)
            .copied()
            .unwrap_or(Severity::Info)
    }
}
