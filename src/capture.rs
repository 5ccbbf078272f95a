//! Recorded-session captures
//!
//! A capture is a JSON document describing one profiling session: every
//! query with its parameters, duration, recorded call stack, and the
//! outcome of the plan introspection that was issued for it. The binary
//! replays a capture through the full interception pipeline, so the engine
//! runs end-to-end without a live database connection.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callsite::{FrameSource, RawFrame};
use crate::plan::{PlanIntrospector, PlanRow};

/// One recorded profiling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCapture {
    pub queries: Vec<CapturedQuery>,
}

/// One recorded query event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedQuery {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub duration_seconds: f64,
    /// Call stack at query completion, innermost first.
    #[serde(default)]
    pub stack: Vec<RawFrame>,
    pub plan: PlanOutcome,
}

/// Outcome of the plan introspection for one query: either the raw
/// 10-column rows the engine returned, or its error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanOutcome {
    Rows { rows: Vec<Vec<Value>> },
    Error { error: String },
}

impl SessionCapture {
    /// Load a capture from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("cannot read capture file {}", path.display()))?;
        let capture: Self = serde_json::from_str(&data)
            .with_context(|| format!("malformed capture file {}", path.display()))?;
        Ok(capture)
    }
}

/// Replays recorded plan outcomes in query order.
#[derive(Debug, Default)]
pub struct ScriptedIntrospector {
    outcomes: VecDeque<PlanOutcome>,
}

impl ScriptedIntrospector {
    pub fn new(outcomes: impl IntoIterator<Item = PlanOutcome>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    pub fn push(&mut self, outcome: PlanOutcome) {
        self.outcomes.push_back(outcome);
    }
}

impl PlanIntrospector for ScriptedIntrospector {
    fn explain(&mut self, raw_sql: &str) -> anyhow::Result<Vec<PlanRow>> {
        let outcome = self
            .outcomes
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no recorded plan for query: {raw_sql}"))?;
        match outcome {
            PlanOutcome::Rows { rows } => rows
                .iter()
                .map(|columns| PlanRow::from_columns(columns).map_err(anyhow::Error::new))
                .collect(),
            PlanOutcome::Error { error } => Err(anyhow::anyhow!(error)),
        }
    }
}

/// Frame source that hands back the recorded stack of the query currently
/// being replayed.
#[derive(Debug, Default)]
pub struct ReplaySource {
    current: Mutex<Vec<RawFrame>>,
}

impl ReplaySource {
    /// Install the stack for the next query.
    pub fn set(&self, frames: Vec<RawFrame>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = frames;
    }
}

impl FrameSource for ReplaySource {
    fn capture(&self) -> Vec<RawFrame> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
