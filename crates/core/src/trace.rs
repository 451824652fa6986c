//! Per-request trace
//!
//! Append-only event log, one entry per pipeline stage. The orchestrator
//! owns one recorder per request; adapters never write here, and their
//! internal transient retries are invisible to the trace.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// One stage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: String,
    /// Nanoseconds since the recorder was created (monotonic clock)
    pub started_ns: u64,
    pub duration_ns: u64,
    #[serde(default)]
    pub counts: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

/// Finalized, immutable trace for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub request_id: String,
    pub events: Vec<TraceEvent>,
}

impl Trace {
    /// Column-oriented view: a map of parallel arrays, one row per event
    pub fn to_report(&self) -> BTreeMap<String, serde_json::Value> {
        let mut report = BTreeMap::new();
        report.insert(
            "stage".to_string(),
            serde_json::json!(self.events.iter().map(|e| &e.stage).collect::<Vec<_>>()),
        );
        report.insert(
            "started_ns".to_string(),
            serde_json::json!(self.events.iter().map(|e| e.started_ns).collect::<Vec<_>>()),
        );
        report.insert(
            "duration_ns".to_string(),
            serde_json::json!(self
                .events
                .iter()
                .map(|e| e.duration_ns)
                .collect::<Vec<_>>()),
        );
        report.insert(
            "counts".to_string(),
            serde_json::json!(self.events.iter().map(|e| &e.counts).collect::<Vec<_>>()),
        );
        report.insert(
            "skipped".to_string(),
            serde_json::json!(self.events.iter().map(|e| e.skipped).collect::<Vec<_>>()),
        );
        report.insert(
            "error".to_string(),
            serde_json::json!(self.events.iter().map(|e| &e.error).collect::<Vec<_>>()),
        );
        report
    }

    pub fn stage_events<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a TraceEvent> {
        self.events.iter().filter(move |e| e.stage == stage)
    }
}

/// In-flight stage timer handed out by [`TraceRecorder::begin`]
#[derive(Debug)]
pub struct StageTimer {
    stage: String,
    started: Instant,
    started_ns: u64,
}

/// Mutable trace builder owned by the orchestrator
#[derive(Debug)]
pub struct TraceRecorder {
    request_id: String,
    origin: Instant,
    events: Vec<TraceEvent>,
    enabled: bool,
}

impl TraceRecorder {
    pub fn new(request_id: impl Into<String>, enabled: bool) -> Self {
        Self {
            request_id: request_id.into(),
            origin: Instant::now(),
            events: Vec::new(),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn begin(&self, stage: impl Into<String>) -> StageTimer {
        let now = Instant::now();
        StageTimer {
            stage: stage.into(),
            started: now,
            started_ns: now.duration_since(self.origin).as_nanos() as u64,
        }
    }

    pub fn end(&mut self, timer: StageTimer, counts: BTreeMap<String, i64>) {
        self.end_with(timer, counts, None);
    }

    pub fn end_with(
        &mut self,
        timer: StageTimer,
        counts: BTreeMap<String, i64>,
        error: Option<String>,
    ) {
        if !self.enabled {
            return;
        }
        self.events.push(TraceEvent {
            stage: timer.stage,
            started_ns: timer.started_ns,
            duration_ns: timer.started.elapsed().as_nanos() as u64,
            counts,
            error,
            skipped: false,
        });
    }

    /// Record a disabled or unavailable stage
    pub fn skipped(&mut self, stage: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.events.push(TraceEvent {
            stage: stage.into(),
            started_ns: Instant::now().duration_since(self.origin).as_nanos() as u64,
            duration_ns: 0,
            counts: BTreeMap::new(),
            error: None,
            skipped: true,
        });
    }

    pub fn finalize(self) -> Trace {
        Trace {
            request_id: self.request_id,
            events: self.events,
        }
    }
}

/// Convenience macro-free counts builder
pub fn counts<const N: usize>(pairs: [(&str, i64); N]) -> BTreeMap<String, i64> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_monotonic() {
        let mut rec = TraceRecorder::new("r1", true);
        let t1 = rec.begin("route");
        rec.end(t1, counts([("candidates", 0)]));
        let t2 = rec.begin("fan_out");
        rec.end(t2, counts([("lexical", 4), ("vector", 6)]));
        let trace = rec.finalize();
        assert_eq!(trace.events.len(), 2);
        assert!(trace.events[0].started_ns <= trace.events[1].started_ns);
    }

    #[test]
    fn test_disabled_recorder_emits_nothing() {
        let mut rec = TraceRecorder::new("r1", false);
        let t = rec.begin("fuse");
        rec.end(t, BTreeMap::new());
        rec.skipped("rerank");
        assert!(rec.finalize().events.is_empty());
    }

    #[test]
    fn test_skipped_flag() {
        let mut rec = TraceRecorder::new("r1", true);
        rec.skipped("rerank");
        let trace = rec.finalize();
        assert!(trace.events[0].skipped);
        assert_eq!(trace.events[0].stage, "rerank");
    }

    #[test]
    fn test_report_shape() {
        let mut rec = TraceRecorder::new("r1", true);
        let t = rec.begin("fuse");
        rec.end(t, counts([("fused", 3)]));
        let report = rec.finalize().to_report();
        assert_eq!(report["stage"], serde_json::json!(["fuse"]));
        assert_eq!(report["skipped"], serde_json::json!([false]));
    }
}
