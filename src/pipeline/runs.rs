// src/pipeline/runs.rs
//! Bounded in-memory record of pipeline runs, looked up by RunId.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use crate::analyze::routing::AnalysisMode;
use crate::ingest::types::SourceFailure;

pub const DEFAULT_RUN_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Retrieving,
    Analyzing,
    Persisting,
    Done,
    Failed { reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrieving => "retrieving",
            Self::Analyzing => "analyzing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub items_retrieved: usize,
    pub source_errors: usize,
    /// Distinct ContentKeys in the batch.
    pub distinct_texts: usize,
    pub cache_hits: usize,
    pub fast_calls: usize,
    pub extraction_calls: usize,
    pub extraction_fallbacks: usize,
    pub items_saved: usize,
    pub duplicates_skipped: usize,
    pub write_failures: usize,
    /// Share of retrieved items that did not need an extraction call, in percent.
    pub llm_reduction: f64,
}

impl RunStats {
    pub fn finish(&mut self) {
        self.llm_reduction = if self.items_retrieved == 0 {
            0.0
        } else {
            (1.0 - self.extraction_calls as f64 / self.items_retrieved as f64) * 100.0
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub query: String,
    pub mode: AnalysisMode,
    #[serde(flatten)]
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub source_errors: Vec<SourceFailure>,
}

#[derive(Debug)]
pub struct RunRegistry {
    inner: Mutex<VecDeque<RunRecord>>,
    cap: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RUN_CAPACITY)
    }
}

impl RunRegistry {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Register a new run in `Pending`; evicts the oldest record when full.
    pub fn create(&self, query: &str, mode: AnalysisMode) -> RunId {
        let id = RunId::new();
        let rec = RunRecord {
            run_id: id,
            query: query.to_string(),
            mode,
            state: RunState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            stats: RunStats::default(),
            source_errors: Vec::new(),
        };
        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        v.push_back(rec);
        while v.len() > self.cap {
            v.pop_front();
        }
        id
    }

    /// Apply `f` to the record if it is still held. Terminal records stay terminal.
    pub fn update<F: FnOnce(&mut RunRecord)>(&self, id: RunId, f: F) {
        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rec) = v.iter_mut().find(|r| r.run_id == id) {
            if !rec.state.is_terminal() {
                f(rec);
            }
        }
    }

    pub fn set_state(&self, id: RunId, state: RunState) {
        let terminal = state.is_terminal();
        self.update(id, |r| {
            r.state = state;
            if terminal {
                r.finished_at = Some(Utc::now());
            }
        });
    }

    pub fn get(&self, id: RunId) -> Option<RunRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.run_id == id)
            .cloned()
    }

    /// The newest `n` records, oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunRecord> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_record_is_evicted() {
        let reg = RunRegistry::with_capacity(2);
        let a = reg.create("a", AnalysisMode::Hybrid);
        let b = reg.create("b", AnalysisMode::Hybrid);
        let c = reg.create("c", AnalysisMode::Llm);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_some());
        assert_eq!(reg.snapshot_last_n(1)[0].run_id, c);
    }

    #[test]
    fn terminal_state_is_final() {
        let reg = RunRegistry::default();
        let id = reg.create("q", AnalysisMode::Hybrid);
        reg.set_state(id, RunState::Retrieving);
        reg.set_state(id, RunState::Done);
        reg.set_state(id, RunState::Failed { reason: "late".into() });
        let rec = reg.get(id).unwrap();
        assert_eq!(rec.state, RunState::Done);
        assert!(rec.finished_at.is_some());
    }

    #[test]
    fn record_serializes_state_inline() {
        let reg = RunRegistry::default();
        let id = reg.create("q", AnalysisMode::Transformers);
        reg.set_state(
            id,
            RunState::Failed {
                reason: "storage unavailable: disk".into(),
            },
        );
        let json = serde_json::to_value(reg.get(id).unwrap()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["mode"], "transformers");
        assert_eq!(json["reason"], "storage unavailable: disk");
        assert_eq!(json["run_id"], id.to_string());
    }

    #[test]
    fn llm_reduction_is_a_percentage() {
        let mut s = RunStats {
            items_retrieved: 10,
            extraction_calls: 2,
            ..Default::default()
        };
        s.finish();
        assert!((s.llm_reduction - 80.0).abs() < 1e-9);
        let mut empty = RunStats::default();
        empty.finish();
        assert_eq!(empty.llm_reduction, 0.0);
    }

    #[test]
    fn run_id_round_trips_through_text() {
        let id = RunId::new();
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert!("nope".parse::<RunId>().is_err());
    }
}
