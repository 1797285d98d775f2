//! # Trapwire - Core Library
//!
//! Behavioral-scoring core for a network honeypot.
//!
//! Trapwire consumes normalized request telemetry, keeps rolling per-source
//! state, applies rule-based risk scoring with rate/burst analysis,
//! classifies the likely attack type, and emits alerts when a source
//! crosses a severity threshold. Read-side analytics (leaderboard,
//! per-source summary, global stats) are served from the same state.
//!
//! ## Design Philosophy
//! - **Observe, score, alert.** The core never touches the request path;
//!   scoring is best-effort relative to serving traffic.
//! - Scores only ever go up. A source that once behaved badly stays
//!   interesting.
//! - All history is bounded. Rolling windows drop their oldest entries
//!   silently; that is a retention policy, not an error.

pub mod analytics;
pub mod detection;
pub mod ingest;
pub mod response;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for trapwire.
#[derive(Error, Debug)]
pub enum TrapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Alert delivery failed: {0}")]
    Alert(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type TrapResult<T> = Result<T, TrapError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for trapwire.
///
/// Loaded from `trapwire.toml` in the working directory or a path supplied
/// via CLI flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapConfig {
    /// General daemon settings.
    pub general: GeneralConfig,

    /// Detection state-retention knobs.
    pub detection: DetectionConfig,

    /// Alert emission settings.
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// How often (in seconds) watch mode polls the event file for new lines.
    pub poll_interval_secs: u64,

    /// Prune idle sources every this many poll cycles in watch mode.
    pub prune_every_cycles: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Capacity of the per-source rolling request-timestamp and path windows.
    pub request_window_capacity: usize,

    /// Capacity of the per-source enriched-event timeline.
    pub timeline_capacity: usize,

    /// Sources idle longer than this many minutes are evicted by pruning.
    pub max_idle_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Provider label stamped on every alert record.
    pub provider: String,

    /// Path to the newline-delimited JSON alert log.
    pub alert_log_path: PathBuf,

    /// Optional webhook URL for real-time alert delivery.
    pub webhook_url: Option<String>,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                poll_interval_secs: 2,
                prune_every_cycles: 300,
            },
            detection: DetectionConfig {
                request_window_capacity: 500,
                timeline_capacity: 300,
                max_idle_minutes: 60,
            },
            alerts: AlertConfig {
                provider: "honeypot".to_string(),
                alert_log_path: PathBuf::from("./trapwire-data/alerts.jsonl"),
                webhook_url: None,
            },
        }
    }
}

impl TrapConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> TrapResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrapConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> TrapResult<()> {
        let config = Self::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| TrapError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// A normalized request event handed to the core by the ingestion boundary.
///
/// Every field is optional or defaulted: the pipeline must accept whatever
/// shape an attacker managed to produce and never reject an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source identity (typically the client IP). Missing identities are
    /// bucketed under "unknown".
    #[serde(default)]
    pub source: Option<String>,

    /// ISO-8601 event timestamp. Timezone-naive values are treated as UTC;
    /// missing or unparsable values fall back to processing time.
    #[serde(default)]
    pub timestamp: Option<String>,

    /// Request path.
    #[serde(default)]
    pub path: Option<String>,

    /// HTTP method.
    #[serde(default)]
    pub method: Option<String>,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// User agent, if the boundary extracted it separately from headers.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Opaque structured request body.
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Parsed query parameters.
    #[serde(default)]
    pub query_params: HashMap<String, String>,
}

impl RawEvent {
    /// Best-effort user agent: the dedicated field first, then the
    /// User-Agent header, then empty.
    pub fn effective_user_agent(&self) -> &str {
        if let Some(ref ua) = self.user_agent {
            return ua;
        }
        self.headers
            .get("User-Agent")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Coarse threat tier derived from a source's accumulated score.
///
/// A pure step function of the score: 0-59 info, 60-99 warn, >=100
/// critical. The ordering derive matters: severity transitions are
/// compared to decide alert emission.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Critical,
}

/// Score at which a source enters "warn".
pub const WARN_THRESHOLD: i64 = 60;
/// Score at which a source enters "critical".
pub const CRIT_THRESHOLD: i64 = 100;

impl Severity {
    /// Classify an accumulated score into a severity tier.
    pub fn from_score(score: i64) -> Self {
        if score >= CRIT_THRESHOLD {
            Severity::Critical
        } else if score >= WARN_THRESHOLD {
            Severity::Warn
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort single-label classification derived from triggered tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AttackType {
    Rce,
    Ssrf,
    Lfi,
    Sqli,
    CredentialStuffing,
    AutomatedScan,
    Recon,
    #[default]
    Unknown,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Rce => "rce",
            AttackType::Ssrf => "ssrf",
            AttackType::Lfi => "lfi",
            AttackType::Sqli => "sqli",
            AttackType::CredentialStuffing => "credential-stuffing",
            AttackType::AutomatedScan => "automated-scan",
            AttackType::Recon => "recon",
            AttackType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured explanation of why an event scored what it scored.
///
/// Populated for observability and alert evidence; scoring correctness
/// does not depend on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreReasons {
    /// The endpoint-weight rule that matched, if any.
    pub endpoint: Option<EndpointReason>,

    /// Every payload indicator that fired.
    pub indicators: Vec<IndicatorReason>,

    /// Rate-window contribution, if the source was fast enough to matter.
    pub rate: Option<RateReason>,

    /// Burst-window contribution, if the source swept enough paths.
    pub burst: Option<BurstReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReason {
    pub path: String,
    pub weight: i64,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorReason {
    pub tag: String,
    pub weight: i64,
    /// The signature pattern that matched, for drill-down.
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateReason {
    /// Requests observed in the trailing 60 seconds.
    pub rpm: usize,
    pub added: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstReason {
    /// Distinct paths observed in the trailing 30 seconds.
    pub distinct_paths_30s: usize,
    pub added: i64,
}

/// The immutable enriched record returned to the caller and appended to a
/// source's timeline: the original event fields plus everything the
/// pipeline computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    /// Resolved source identity ("unknown" when the event carried none).
    pub source: String,

    /// Resolved event time (parsed from the event, or processing time).
    pub time: DateTime<Utc>,

    pub path: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Option<serde_json::Value>,

    /// Points this event contributed, AI boost included.
    pub score_delta: i64,

    /// The source's accumulated score after this event.
    pub score_total: i64,

    /// Tags this event triggered, deduplicated, first-occurrence order.
    pub tags: Vec<String>,

    pub attack_type_guess: AttackType,
    pub severity: Severity,
    pub reasons: ScoreReasons,

    /// Contribution of the external AI risk hint, already clamped to [0, 20].
    pub ai_boost: i64,
}

/// An alert record handed to the sink when a source crosses a severity
/// threshold. Append-only; never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub provider: String,
    pub source_id: String,
    pub severity: Severity,
    pub score: i64,
    pub attack_type_guess: AttackType,

    /// The source's 5 most frequent tags at emission time.
    pub top_tags: Vec<String>,

    pub evidence: AlertEvidence,

    /// Event time of the request that triggered the crossing.
    pub time: DateTime<Utc>,

    /// Stamped at hand-off to the sink.
    pub emitted_at: DateTime<Utc>,
}

/// Evidence from the event that pushed the source over a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvidence {
    pub last_path: Option<String>,
    pub last_method: Option<String>,
    pub last_user_agent: Option<String>,
    pub last_reasons: ScoreReasons,
}
