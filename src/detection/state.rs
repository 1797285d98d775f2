//! # Per-Source State Store
//!
//! Owns every `SourceState` record. The pipeline mutates records through
//! `get_or_create`; analytics reads them through `snapshot`. Nothing else
//! holds state.
//!
//! ## Locking model
//! The source map is guarded by an `RwLock`; each record sits behind its
//! own `Mutex` inside an `Arc`. Two requests racing on the same source id
//! serialize on the record lock, while different sources never contend.
//! The map lock is always released before a record lock is taken, so
//! pruning (which walks the map) cannot deadlock against in-flight
//! processing. A record pruned while a handle is still held stays valid
//! through its `Arc`; the source is simply recreated empty on next access.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::{AttackType, DetectionConfig, EnrichedEvent};

/// Rolling behavioral state for one originating identity.
#[derive(Debug)]
pub struct SourceState {
    /// Identity key, typically the client IP.
    pub id: String,

    /// Accumulated threat score. Monotonically non-decreasing, unbounded.
    pub score: i64,

    /// Timestamp of the most recent event. Last-write-wins: out-of-order
    /// delivery can move this backward relative to arrival order.
    pub last_seen: Option<DateTime<Utc>>,

    /// Occurrence count per tag.
    pub tag_counts: HashMap<String, u64>,

    /// Current best classification, overwritten on every event.
    pub attack_type_guess: AttackType,

    /// Rolling request timestamps for rate checks. Oldest evicted at capacity.
    pub request_times: VecDeque<DateTime<Utc>>,

    /// Rolling (timestamp, path) pairs for burst/sweep checks.
    pub recent_paths: VecDeque<(DateTime<Utc>, String)>,

    /// Bounded history of enriched events for drill-down and alert evidence.
    pub timeline: VecDeque<EnrichedEvent>,

    request_window_capacity: usize,
    timeline_capacity: usize,
}

impl SourceState {
    fn new(id: String, config: &DetectionConfig) -> Self {
        Self {
            id,
            score: 0,
            last_seen: None,
            tag_counts: HashMap::new(),
            attack_type_guess: AttackType::Unknown,
            request_times: VecDeque::with_capacity(config.request_window_capacity),
            recent_paths: VecDeque::with_capacity(config.request_window_capacity),
            timeline: VecDeque::with_capacity(config.timeline_capacity),
            request_window_capacity: config.request_window_capacity,
            timeline_capacity: config.timeline_capacity,
        }
    }

    /// Append a request timestamp, evicting the oldest at capacity.
    pub fn record_request(&mut self, at: DateTime<Utc>) {
        if self.request_times.len() == self.request_window_capacity {
            self.request_times.pop_front();
        }
        self.request_times.push_back(at);
    }

    /// Append a (timestamp, path) pair, evicting the oldest at capacity.
    pub fn record_path(&mut self, at: DateTime<Utc>, path: String) {
        if self.recent_paths.len() == self.request_window_capacity {
            self.recent_paths.pop_front();
        }
        self.recent_paths.push_back((at, path));
    }

    /// Append an enriched event to the timeline, evicting the oldest at capacity.
    pub fn record_timeline(&mut self, event: EnrichedEvent) {
        if self.timeline.len() == self.timeline_capacity {
            self.timeline.pop_front();
        }
        self.timeline.push_back(event);
    }

    /// Requests observed within the trailing `window` ending at `now`.
    pub fn requests_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        self.request_times.iter().filter(|t| **t >= cutoff).count()
    }

    /// Distinct paths observed within the trailing `window` ending at `now`.
    pub fn distinct_paths_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        let mut seen = std::collections::HashSet::new();
        for (t, p) in &self.recent_paths {
            if *t >= cutoff {
                seen.insert(p.as_str());
            }
        }
        seen.len()
    }

    /// The source's most frequent tags, highest count first. Ties break on
    /// tag name so the output is deterministic.
    pub fn top_tags(&self, limit: usize) -> Vec<String> {
        let mut tags: Vec<(&String, &u64)> = self.tag_counts.iter().collect();
        tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        tags.into_iter().take(limit).map(|(t, _)| t.clone()).collect()
    }
}

/// Shared handle to one source's state.
pub type SourceHandle = Arc<Mutex<SourceState>>;

/// In-memory store of all per-source state, keyed by source identity.
///
/// Constructed once at service start and shared by reference with the
/// pipeline and analytics. There are no ambient globals.
pub struct StateStore {
    config: DetectionConfig,
    sources: RwLock<HashMap<String, SourceHandle>>,
}

impl StateStore {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            config: config.clone(),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the state record for `id`, creating an empty one on first
    /// access. Never fails.
    pub fn get_or_create(&self, id: &str) -> SourceHandle {
        // Fast path: the source already exists.
        if let Some(handle) = self.sources.read().get(id) {
            return Arc::clone(handle);
        }

        let mut sources = self.sources.write();
        // Re-check under the write lock: another request may have created
        // the record between our read and write acquisitions.
        Arc::clone(
            sources
                .entry(id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(SourceState::new(id.to_string(), &self.config)))
                }),
        )
    }

    /// Look up a source without creating it.
    pub fn get(&self, id: &str) -> Option<SourceHandle> {
        self.sources.read().get(id).map(Arc::clone)
    }

    /// Remove every source whose `last_seen` precedes `now - max_idle_minutes`.
    /// Sources that have never recorded an event are kept. Returns the
    /// number of evicted sources.
    pub fn prune_idle(&self, max_idle_minutes: i64) -> usize {
        let cutoff = Utc::now() - Duration::minutes(max_idle_minutes);
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|_, handle| match handle.lock().last_seen {
            Some(last_seen) => last_seen >= cutoff,
            None => true,
        });
        before - sources.len()
    }

    /// Snapshot of all (id, handle) pairs for read-side iteration.
    ///
    /// Handles are cloned out so callers never iterate while holding the
    /// map lock.
    pub fn snapshot(&self) -> Vec<(String, SourceHandle)> {
        self.sources
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Number of tracked sources.
    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}
