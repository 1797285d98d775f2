//! # Alert Sinks
//!
//! Delivery backends for alert records. Durable storage is an external
//! responsibility; the core only hands records off:
//! - JSONL file (one JSON object per line, easy to parse with jq/grep)
//! - Webhook (HTTP POST via ureq, optional)
//!
//! Sink failures never abort scoring. The emitter logs them and moves on.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{AlertRecord, TrapError, TrapResult};

/// A destination for emitted alert records.
pub trait AlertSink: Send + Sync {
    /// Hand one record off for delivery.
    fn deliver(&self, record: &AlertRecord) -> TrapResult<()>;
}

// ---------------------------------------------------------------------------
// JSONL file sink
// ---------------------------------------------------------------------------

/// Appends each alert as a JSON line to a file, creating the file and its
/// parent directories on first use.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSink for JsonlSink {
    fn deliver(&self, record: &AlertRecord) -> TrapResult<()> {
        let line = serde_json::to_string(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook sink
// ---------------------------------------------------------------------------

/// POSTs each alert as JSON to a webhook URL. Compatible with Slack,
/// Discord, PagerDuty, and generic HTTP collectors.
///
/// Timeout: 5 seconds. A connection failure is returned as an error so the
/// emitter can log it; it never propagates further.
pub struct WebhookSink {
    url: String,
    agent: ureq::Agent,
}

impl WebhookSink {
    /// Create a webhook sink. The URL must be http:// or https://.
    pub fn new(url: &str) -> TrapResult<Self> {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(TrapError::Alert(format!(
                "Webhook URL must start with http:// or https://, got: {}",
                url
            )));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }
}

impl AlertSink for WebhookSink {
    fn deliver(&self, record: &AlertRecord) -> TrapResult<()> {
        let payload = serde_json::to_string(record)?;
        self.agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&payload)
            .map_err(|e| TrapError::Alert(format!("POST to {} failed: {}", self.url, e)))?;

        log::info!("[SINK] Alert for {} delivered to {}", record.source_id, self.url);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Delivers to several sinks; a failure in one does not stop the others.
/// Returns the first error, if any, for the emitter to log.
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

impl AlertSink for FanoutSink {
    fn deliver(&self, record: &AlertRecord) -> TrapResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(record) {
                log::warn!("[SINK] Delivery failed: {}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
