//! # Event Ingest
//!
//! Reads normalized event records as newline-delimited JSON, one envelope
//! per line. The envelope is the event the ingestion boundary produced
//! plus an optional externally computed AI risk hint.
//!
//! Two modes:
//! - one-shot: parse an entire file (or stdin) and return the envelopes;
//! - follow: remember a byte offset into a growing file and return only
//!   new complete lines on each poll, resetting on rotation.
//!
//! Unparsable lines are logged and skipped; a hostile or broken producer
//! must not stall scoring.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{RawEvent, TrapResult};

/// One NDJSON line: the event plus its optional AI risk hint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: RawEvent,

    /// External AI risk hint, on [0,1] or [0,100].
    #[serde(default)]
    pub ai_risk_score: Option<f64>,
}

/// Parse every envelope from a reader, skipping blank and malformed lines.
pub fn read_envelopes<R: Read>(reader: R) -> TrapResult<Vec<EventEnvelope>> {
    let reader = BufReader::new(reader);
    let mut envelopes = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Some(envelope) => envelopes.push(envelope),
            None if line.trim().is_empty() => {}
            None => {
                log::warn!("[INGEST] Skipping malformed line {}", lineno + 1);
            }
        }
    }

    Ok(envelopes)
}

/// Parse envelopes from a file.
pub fn read_envelopes_from_file(path: &Path) -> TrapResult<Vec<EventEnvelope>> {
    let file = std::fs::File::open(path)?;
    read_envelopes(file)
}

fn parse_line(line: &str) -> Option<EventEnvelope> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Tails a growing NDJSON event file.
///
/// Tracks the byte offset of the last complete line read so each poll
/// returns only new data. A file that shrinks is treated as rotated and
/// re-read from the start.
pub struct EventFollower {
    path: PathBuf,
    offset: u64,
}

impl EventFollower {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Skip everything already in the file so the first poll only returns
    /// lines written after startup. Call once before the poll loop.
    pub fn seek_to_end(&mut self) {
        self.offset = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
    }

    /// Read envelopes appended since the last poll.
    ///
    /// A missing file is not an error (the producer may not have started
    /// yet); it simply yields nothing.
    pub fn poll(&mut self) -> Vec<EventEnvelope> {
        let file_size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return Vec::new(),
        };

        if file_size < self.offset {
            log::info!(
                "[INGEST] Rotation detected for {} (size {} < offset {}), re-reading",
                self.path.display(),
                file_size,
                self.offset,
            );
            self.offset = 0;
        } else if file_size == self.offset {
            return Vec::new();
        }

        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[INGEST] Cannot open {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }

        let mut envelopes = Vec::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(bytes) => {
                    // Only advance past complete lines; a partially written
                    // line is picked up whole on the next poll.
                    if !line.ends_with('\n') {
                        break;
                    }
                    self.offset += bytes as u64;
                    if let Some(envelope) = parse_line(&line) {
                        envelopes.push(envelope);
                    }
                }
                Err(e) => {
                    log::warn!("[INGEST] Read error in {}: {}", self.path.display(), e);
                    break;
                }
            }
        }

        envelopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_envelopes_parses_and_skips_garbage() {
        let input = concat!(
            r#"{"source": "1.2.3.4", "path": "/admin", "method": "GET"}"#,
            "\n",
            "not json at all\n",
            "\n",
            r#"{"source": "5.6.7.8", "path": "/login", "ai_risk_score": 0.9}"#,
            "\n",
        );

        let envelopes = read_envelopes(input.as_bytes()).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].event.source.as_deref(), Some("1.2.3.4"));
        assert!(envelopes[0].ai_risk_score.is_none());
        assert_eq!(envelopes[1].ai_risk_score, Some(0.9));
    }

    #[test]
    fn test_envelope_flattens_event_fields() {
        let envelope: EventEnvelope = serde_json::from_str(
            r#"{"source": "1.2.3.4", "path": "/api/x", "query_params": {"cmd": "id"}, "ai_risk_score": 42}"#,
        )
        .unwrap();
        assert_eq!(envelope.event.path.as_deref(), Some("/api/x"));
        assert_eq!(envelope.event.query_params["cmd"], "id");
        assert_eq!(envelope.ai_risk_score, Some(42.0));
    }

    #[test]
    fn test_follower_returns_only_new_lines() {
        let dir = std::env::temp_dir().join("trapwire_test_follower");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.jsonl");

        std::fs::write(&path, "{\"source\": \"old\"}\n").unwrap();

        let mut follower = EventFollower::new(&path);
        follower.seek_to_end();
        assert!(follower.poll().is_empty());

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", r#"{"source": "new", "path": "/admin"}"#).unwrap();
        drop(file);

        let envelopes = follower.poll();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event.source.as_deref(), Some("new"));

        // Nothing new on the next poll.
        assert!(follower.poll().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_follower_missing_file_yields_nothing() {
        let mut follower = EventFollower::new("/nonexistent/trapwire/events.jsonl");
        assert!(follower.poll().is_empty());
    }
}
