//! # Trapwire - CLI Entry Point
//!
//! Commands:
//! - `run`         - Score an NDJSON event stream (file or stdin) once and
//!                   print the leaderboard and global stats
//! - `watch`       - Follow a growing NDJSON event file, scoring new events
//!                   as they arrive, with periodic idle pruning
//! - `init-config` - Generate a default configuration file

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use trapwire::detection::DetectionPipeline;
use trapwire::ingest::{self, EventFollower};
use trapwire::response::sink::{AlertSink, FanoutSink, JsonlSink, WebhookSink};
use trapwire::{analytics, TrapConfig, TrapError, TrapResult};

/// Trapwire - behavioral scoring core for a network honeypot.
///
/// Consumes request telemetry, accumulates per-source threat scores, and
/// alerts on severity threshold crossings.
#[derive(Parser, Debug)]
#[command(name = "trapwire")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "trapwire.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score an event stream once and print analytics.
    Run {
        /// NDJSON event file; "-" reads stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Leaderboard rows to print.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Follow a growing NDJSON event file until interrupted.
    Watch {
        /// NDJSON event file to tail.
        input: PathBuf,

        /// Process lines already present instead of starting at end-of-file.
        #[arg(long)]
        from_start: bool,
    },

    /// Generate a default configuration file.
    InitConfig,
}

fn main() -> TrapResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { input, limit } => cmd_run(&cli.config, &input, limit),
        Commands::Watch { input, from_start } => cmd_watch(&cli.config, &input, from_start),
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

fn load_config(config_path: &Path) -> TrapResult<TrapConfig> {
    if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        TrapConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(TrapConfig::default())
    }
}

/// Build the alert sink stack from config: always the JSONL file, plus the
/// webhook when one is configured.
fn build_sink(config: &TrapConfig) -> TrapResult<Box<dyn AlertSink>> {
    let jsonl = Box::new(JsonlSink::new(config.alerts.alert_log_path.clone()));
    match config.alerts.webhook_url {
        Some(ref url) => {
            let webhook = Box::new(WebhookSink::new(url)?);
            Ok(Box::new(FanoutSink::new(vec![jsonl, webhook])))
        }
        None => Ok(jsonl),
    }
}

/// Score a full event stream once, then print the leaderboard and stats.
fn cmd_run(config_path: &Path, input: &str, limit: usize) -> TrapResult<()> {
    let config = load_config(config_path)?;
    let pipeline = DetectionPipeline::new(&config, build_sink(&config)?);

    let envelopes = if input == "-" {
        ingest::read_envelopes(std::io::stdin().lock())?
    } else {
        ingest::read_envelopes_from_file(Path::new(input))?
    };

    info!("Scoring {} events", envelopes.len());
    for envelope in &envelopes {
        pipeline.process(&envelope.event, envelope.ai_risk_score);
    }

    let store = pipeline.store();
    let board = analytics::leaderboard(store, limit);
    let stats = analytics::global_stats(store);

    let report = serde_json::json!({
        "leaderboard": board,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if pipeline.degraded_count() > 0 {
        warn!("{} events scored degraded", pipeline.degraded_count());
    }

    Ok(())
}

/// Follow an event file, scoring new lines as they appear.
///
/// The loop: poll for new envelopes, score them, and every
/// `prune_every_cycles` cycles evict idle sources. Ctrl-C sets a shutdown
/// flag and the loop drains gracefully.
fn cmd_watch(config_path: &Path, input: &Path, from_start: bool) -> TrapResult<()> {
    let config = load_config(config_path)?;
    let pipeline = DetectionPipeline::new(&config, build_sink(&config)?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    let mut follower = EventFollower::new(input);
    if !from_start {
        follower.seek_to_end();
    }

    info!("Watching {} for events", input.display());

    let poll_interval = std::time::Duration::from_secs(config.general.poll_interval_secs);
    let mut total_events: u64 = 0;
    let mut cycles: u64 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown signal received. Stopping gracefully...");
            break;
        }

        let envelopes = follower.poll();
        if !envelopes.is_empty() {
            total_events += envelopes.len() as u64;
            info!("Polled {} new events (total: {})", envelopes.len(), total_events);
            for envelope in &envelopes {
                let enriched = pipeline.process(&envelope.event, envelope.ai_risk_score);
                log::debug!(
                    "{} {} -> +{} ({} total, {})",
                    enriched.source,
                    enriched.path.as_deref().unwrap_or("-"),
                    enriched.score_delta,
                    enriched.score_total,
                    enriched.severity,
                );
            }
        }

        cycles += 1;
        if cycles % config.general.prune_every_cycles == 0 {
            let evicted = pipeline.store().prune_idle(config.detection.max_idle_minutes);
            if evicted > 0 {
                info!("Pruned {} idle sources", evicted);
            }
        }

        std::thread::sleep(poll_interval);
    }

    let stats = analytics::global_stats(pipeline.store());
    info!(
        "Stopped. {} events across {} sources ({} degraded).",
        total_events,
        stats.total_sources,
        pipeline.degraded_count(),
    );

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> TrapResult<()> {
    if config_path.exists() {
        return Err(TrapError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    TrapConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!("Key settings:");
    println!("  [detection] - rolling window capacities and idle eviction");
    println!("  [alerts]    - alert log path, provider label, optional webhook");
    println!("  [general]   - watch-mode poll interval and prune cadence");

    Ok(())
}
