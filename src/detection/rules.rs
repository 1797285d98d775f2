//! # Rule Engine
//!
//! Maps one raw event plus its source's rolling state to a score delta, a
//! set of tags, and an attack-type guess. Four rule families run in order,
//! and their contributions are additive:
//!
//! 1. **Endpoint weight** - the request path against an ordered table;
//!    first match wins.
//! 2. **Payload indicators** - signature patterns over a combined haystack
//!    of path, method, user agent, query string, and body; every matching
//!    signature fires.
//! 3. **Rate** - requests in the trailing 60 seconds; only the highest
//!    tier fires.
//! 4. **Burst** - distinct paths in the trailing 30 seconds.
//!
//! Classification then picks a single attack-type label from the tag set
//! by fixed priority.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::detection::state::SourceState;
use crate::{
    AttackType, BurstReason, EndpointReason, IndicatorReason, RateReason, RawEvent, ScoreReasons,
    TrapResult,
};

/// Requests-per-minute above which the rate check adds its full weight.
const RATE_SPIKE_RPM: usize = 30;
/// Requests-per-minute above which the rate check adds its reduced weight.
const RATE_ELEVATED_RPM: usize = 15;
/// Distinct paths in 30 seconds at which the burst check fires.
const PATH_SWEEP_DISTINCT: usize = 10;

// ---------------------------------------------------------------------------
// Rule tables (compiled once, used forever)
// ---------------------------------------------------------------------------

struct EndpointRule {
    pattern: Regex,
    weight: i64,
    tag: &'static str,
}

/// Ordered endpoint-weight table; first match wins.
static ENDPOINT_RULES: LazyLock<Vec<EndpointRule>> = LazyLock::new(|| {
    let rule = |pattern: &str, weight: i64, tag: &'static str| EndpointRule {
        pattern: Regex::new(pattern).expect("endpoint regex"),
        weight,
        tag,
    };
    vec![
        rule(r"^/admin/?$", 25, "admin-probe"),
        rule(r"^/config/?$", 30, "config-probe"),
        rule(r"^/backup/?$", 30, "backup-probe"),
        rule(r"^/login/?$", 10, "login-probe"),
        rule(r"^/api/.*", 8, "api-probe"),
        rule(r"^/health/?$", 0, "health"),
        rule(r"^/$", 0, "root"),
    ]
});

struct IndicatorRule {
    pattern: Regex,
    weight: i64,
    tag: &'static str,
}

/// Payload signatures. Every rule is independently matchable; all matches
/// fire and their weights sum.
static INDICATOR_RULES: LazyLock<Vec<IndicatorRule>> = LazyLock::new(|| {
    let rule = |pattern: &str, weight: i64, tag: &'static str| IndicatorRule {
        pattern: Regex::new(pattern).expect("indicator regex"),
        weight,
        tag,
    };
    vec![
        // Scanner / tooling fingerprints
        rule(
            r"(?i)\b(sqlmap|nikto|acunetix|nmap|masscan|zgrab|burp)\b",
            20,
            "scanner-tool",
        ),
        // SQL injection
        rule(
            r"(?i)(union\s+select|or\s+1\s*=\s*1|--\s|'\s*--|sleep\(|benchmark\()",
            25,
            "sqli",
        ),
        // Path traversal / sensitive file access
        rule(
            r"(?i)(\.\./|\.\.\\|/etc/passwd|win\.ini|boot\.ini)",
            25,
            "lfi-traversal",
        ),
        // Command injection
        rule(
            r"(?i)\b(cmd=|powershell|bash\s+-c|sh\s+-c|wget\b|curl\b)\b",
            35,
            "rce-attempt",
        ),
        // SSRF targets (cloud metadata services)
        rule(
            r"(?i)(169\.254\.169\.254|metadata\.google\.internal)",
            25,
            "ssrf",
        ),
    ]
});

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Output of the rule engine for one event.
#[derive(Debug, Clone, Default)]
pub struct RuleVerdict {
    /// Sum of all rule contributions. AI boost is layered on by the pipeline.
    pub delta: i64,

    /// Triggered tags, deduplicated, first-occurrence order.
    pub tags: Vec<String>,

    /// Single-label classification from the tag set.
    pub guess: AttackType,

    /// Per-rule-family match evidence.
    pub reasons: ScoreReasons,
}

/// Score one event against its source's state.
///
/// Appends `now` to the source's rolling windows as a side effect (the
/// rate and burst checks count the event being scored). The caller holds
/// the source lock, so window mutation and counting are atomic per source.
pub fn score_event(
    event: &RawEvent,
    state: &mut SourceState,
    now: DateTime<Utc>,
) -> TrapResult<RuleVerdict> {
    let path = event.path.as_deref().unwrap_or("").trim();
    let method = event
        .method
        .as_deref()
        .unwrap_or("")
        .to_ascii_uppercase();
    let user_agent = event.effective_user_agent();

    let haystack = build_haystack(event, path, &method, user_agent)?;

    let mut delta: i64 = 0;
    let mut tags: Vec<String> = Vec::new();
    let mut reasons = ScoreReasons::default();

    // 1) Endpoint weight - first match wins.
    for rule in ENDPOINT_RULES.iter() {
        if rule.pattern.is_match(path) {
            delta += rule.weight;
            tags.push(rule.tag.to_string());
            reasons.endpoint = Some(EndpointReason {
                path: path.to_string(),
                weight: rule.weight,
                tag: rule.tag.to_string(),
            });
            break;
        }
    }

    // 2) Payload indicators - all matches fire.
    for rule in INDICATOR_RULES.iter() {
        if rule.pattern.is_match(&haystack) {
            delta += rule.weight;
            tags.push(rule.tag.to_string());
            reasons.indicators.push(IndicatorReason {
                tag: rule.tag.to_string(),
                weight: rule.weight,
                pattern: rule.pattern.as_str().to_string(),
            });
        }
    }

    // 3) Rate - requests in the last 60 seconds, highest tier only.
    state.record_request(now);
    let rpm = state.requests_within(now, Duration::seconds(60));
    if rpm > RATE_SPIKE_RPM {
        delta += 20;
        tags.push("rate-spike".to_string());
        reasons.rate = Some(RateReason { rpm, added: 20 });
    } else if rpm > RATE_ELEVATED_RPM {
        delta += 10;
        tags.push("rate-elevated".to_string());
        reasons.rate = Some(RateReason { rpm, added: 10 });
    }

    // 4) Burst - distinct paths in the last 30 seconds.
    state.record_path(now, path.to_string());
    let distinct = state.distinct_paths_within(now, Duration::seconds(30));
    if distinct >= PATH_SWEEP_DISTINCT {
        delta += 15;
        tags.push("path-sweep".to_string());
        reasons.burst = Some(BurstReason {
            distinct_paths_30s: distinct,
            added: 15,
        });
    }

    let tags = dedupe(tags);
    let guess = classify(&tags);

    Ok(RuleVerdict {
        delta,
        tags,
        guess,
        reasons,
    })
}

/// Combine the scannable parts of an event into one search string.
///
/// Query parameters are rendered as a `k=v&k=v` query string so injected
/// parameter values (e.g. `cmd=whoami`) are visible to the signatures;
/// the body is rendered as JSON.
fn build_haystack(
    event: &RawEvent,
    path: &str,
    method: &str,
    user_agent: &str,
) -> TrapResult<String> {
    let mut parts: Vec<String> =
        vec![path.to_string(), method.to_string(), user_agent.to_string()];

    if !event.query_params.is_empty() {
        let query = event
            .query_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        parts.push(query);
    }

    if let Some(ref body) = event.body {
        parts.push(serde_json::to_string(body)?);
    }

    Ok(parts.join(" | "))
}

/// Deduplicate tags, preserving first-occurrence order.
fn dedupe(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

/// Derive the attack-type guess from triggered tags, by fixed priority.
pub fn classify(tags: &[String]) -> AttackType {
    let has = |t: &str| tags.iter().any(|tag| tag == t);

    if has("rce-attempt") {
        return AttackType::Rce;
    }
    if has("ssrf") {
        return AttackType::Ssrf;
    }
    if has("lfi-traversal") {
        return AttackType::Lfi;
    }
    if has("sqli") {
        return AttackType::Sqli;
    }
    if has("login-probe") && (has("rate-spike") || has("rate-elevated")) {
        return AttackType::CredentialStuffing;
    }
    if has("path-sweep") || has("scanner-tool") {
        return AttackType::AutomatedScan;
    }
    if has("admin-probe") || has("config-probe") || has("backup-probe") {
        return AttackType::Recon;
    }
    AttackType::Unknown
}
