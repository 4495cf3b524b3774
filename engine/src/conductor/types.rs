//! Conductor Types
//!
//! Data model for one execution tree: neurons, their execution states, retry
//! bookkeeping and the aggregated answer returned to the caller.

use sdk::errors::{AxonErrorExt, EngineError};
use sdk::Params;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Position of a neuron in the tree: `(depth, index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeuronId {
    pub depth: usize,
    pub index: usize,
}

impl NeuronId {
    pub fn new(depth: usize, index: usize) -> Self {
        Self { depth, index }
    }
}

impl fmt::Display for NeuronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.depth, self.index)
    }
}

/// How a neuron is carried out. Resolved once, during the pre-spawn check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronKind {
    /// Apply the neuron to every element of a list already in context
    IterationSpawn,
    /// Split a conjunctive description into independent sub-goals
    MultiStepSpawn,
    /// Resolve one tool and call it
    DirectInvoke,
    /// Count or filter data already in context with the analysis tool
    DataAnalysis,
}

/// States of the per-neuron state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Init,
    PreSpawnCheck,
    ToolResolution,
    ParamBinding,
    Invoke,
    ErrorReflection,
    PostSpawnCheck,
    Validation,
    Accepted,
    FailedSoft,
}

impl ExecState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::FailedSoft)
    }
}

/// Handle to a dendrite run on behalf of a neuron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DendriteRef {
    /// Key path prefix the dendrite's neurons were stored under
    pub path: String,
    pub goal: String,
    pub success: bool,
}

/// Retry bookkeeping for one neuron. Discarded once the neuron settles.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Attempts consumed so far
    pub attempt: usize,
    pub last_error: Option<String>,
    pub last_hint: Option<String>,
    pub last_params: Params,
}

impl RetryState {
    /// Record a failed attempt and consume it
    pub fn record(&mut self, error: impl Into<String>, hint: Option<String>, params: &Params) {
        self.attempt += 1;
        self.last_error = Some(error.into());
        if hint.is_some() {
            self.last_hint = hint;
        }
        self.last_params = params.clone();
    }

    pub fn exhausted(&self, max_attempts: usize) -> bool {
        self.attempt >= max_attempts
    }

    /// Feedback lines for the next binding prompt
    pub fn feedback(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(err) = &self.last_error {
            lines.push(format!("Previous attempt failed: {}", err));
        }
        if let Some(hint) = &self.last_hint {
            lines.push(format!("Hint from the tool: {}", hint));
        }
        if !self.last_params.is_empty() {
            lines.push(format!(
                "Parameters used last time: {}",
                Value::Object(self.last_params.clone())
            ));
        }
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

/// One unit of work in the execution tree
#[derive(Debug)]
pub struct Neuron {
    pub id: NeuronId,
    pub description: String,
    pub depth: usize,
    pub result: Option<Value>,
    pub validated: bool,
    pub children: Vec<DendriteRef>,
    pub kind: Option<NeuronKind>,
    /// Name of the tool that produced `result`, if any
    pub tool: Option<String>,
    /// Why the neuron ended in `FailedSoft`
    pub failure: Option<EngineError>,
    /// Appended by the goal-level completeness check; transforms stored data only
    pub corrective: bool,
}

impl Neuron {
    pub fn new(depth: usize, index: usize, description: impl Into<String>) -> Self {
        Self {
            id: NeuronId::new(depth, index),
            description: description.into(),
            depth,
            result: None,
            validated: false,
            children: Vec::new(),
            kind: None,
            tool: None,
            failure: None,
            corrective: false,
        }
    }

    pub fn corrective(depth: usize, index: usize, description: impl Into<String>) -> Self {
        Self {
            corrective: true,
            ..Self::new(depth, index, description)
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Error marker persisted in place of a result for a failed neuron
pub fn error_marker(error: &EngineError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "error_kind": error.kind(),
    })
}

/// Final answer for one execution tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub summary: String,
    /// The value that answers the goal (a formatted text, a number, a list...)
    pub answer: Value,
    /// Per-neuron results, truncated
    pub detailed: Vec<Value>,
}

/// Counters shared by every node of one tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub neurons_executed: usize,
    pub dendrites_spawned: usize,
    pub deepest: usize,
}

/// What `Engine::run` hands back to its caller
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub result: Option<AggregatedResult>,
    pub error: Option<EngineError>,
    pub stats: RunStats,
}

impl RunOutcome {
    pub fn failed(error: EngineError, result: Option<AggregatedResult>, stats: RunStats) -> Self {
        Self {
            success: false,
            result,
            error: Some(error),
            stats,
        }
    }

    /// The answer value, or `null` when nothing was produced
    pub fn answer(&self) -> Value {
        self.result
            .as_ref()
            .map(|r| r.answer.clone())
            .unwrap_or(Value::Null)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "success": self.success,
            "result": self.result,
            "error": self.error.as_ref().map(|e| json!({
                "kind": e.kind(),
                "message": e.to_string(),
                "hint": e.user_hint(),
            })),
            "stats": self.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neuron_id_display() {
        assert_eq!(NeuronId::new(0, 3).to_string(), "(0,3)");
    }

    #[test]
    fn test_retry_state_feedback() {
        let mut retry = RetryState::default();
        assert!(retry.feedback().is_none());

        let mut params = Params::new();
        params.insert("limit".to_string(), json!(5));
        retry.record("bad limit", Some("use per_page".to_string()), &params);

        assert_eq!(retry.attempt, 1);
        assert!(!retry.exhausted(2));
        let feedback = retry.feedback().unwrap();
        assert!(feedback.contains("bad limit"));
        assert!(feedback.contains("use per_page"));
        assert!(feedback.contains("\"limit\":5"));

        retry.record("still bad", None, &params);
        assert!(retry.exhausted(2));
        assert_eq!(retry.last_hint.as_deref(), Some("use per_page"));
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = RunOutcome::failed(
            EngineError::DecompositionFailure("no steps".into()),
            None,
            RunStats::default(),
        );
        let json = outcome.to_json();
        assert_eq!(json["success"], json!(false));
        assert_eq!(json["error"]["kind"], json!("decomposition_failure"));
        assert_eq!(outcome.answer(), Value::Null);
    }
}
