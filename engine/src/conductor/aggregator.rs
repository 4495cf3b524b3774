//! Result Aggregator
//!
//! Folds the results of sibling neurons into one answer for their goal.

use crate::conductor::context::bounded_view;
use crate::conductor::types::{AggregatedResult, Neuron};
use crate::llm::ReasonerClient;
use regex::Regex;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const AGGREGATOR_SYSTEM: &str = "You report the outcome of completed task steps. Be concise.";

/// Object fields that carry a formatted report
const FORMATTED_FIELDS: &[&str] = &["formatted", "report", "table", "text", "markdown"];

const MAX_DETAIL_STRING: usize = 1000;
const MAX_DETAIL_ITEMS: usize = 20;
const MAX_DETAIL_DEPTH: usize = 6;
const STEP_LINE_CHARS: usize = 120;
const DATA_VIEW_BYTES: usize = 1500;

static QUANTITY: OnceLock<Regex> = OnceLock::new();
static COUNTING: OnceLock<Regex> = OnceLock::new();
static FACTUAL: OnceLock<Regex> = OnceLock::new();

fn quantity_pattern() -> &'static Regex {
    QUANTITY.get_or_init(|| {
        Regex::new(r"(?i)\b(?:first|top)\s+(\d+)\b")
            .expect("Invalid quantity pattern")
    })
}

fn counting_pattern() -> &'static Regex {
    COUNTING.get_or_init(|| {
        Regex::new(r"(?i)\bhow\s+many\b|\bcount\b|\bnumber\s+of\b|\btotal\s+number\b")
            .expect("Invalid counting pattern")
    })
}

fn factual_pattern() -> &'static Regex {
    FACTUAL.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:how|what|which|who|when|where|is|are|was|were|do|does|did)\b")
            .expect("Invalid factual pattern")
    })
}

/// `N` from "first N" or "top N"
pub fn quantity_constraint(goal: &str) -> Option<usize> {
    quantity_pattern()
        .captures(goal)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn is_counting_goal(goal: &str) -> bool {
    counting_pattern().is_match(goal)
}

pub struct ResultAggregator {
    reasoner: ReasonerClient,
}

impl ResultAggregator {
    pub fn new(reasoner: ReasonerClient) -> Self {
        Self { reasoner }
    }

    pub async fn aggregate(
        &self,
        goal: &str,
        neurons: &[Neuron],
        cancel: &CancellationToken,
    ) -> Result<AggregatedResult, EngineError> {
        let detailed: Vec<Value> = neurons
            .iter()
            .map(|n| truncate_detail(n.result.as_ref().unwrap_or(&Value::Null)))
            .collect();

        if let [only] = neurons {
            let answer = only.result.clone().unwrap_or(Value::Null);
            return Ok(AggregatedResult {
                summary: one_line(&answer),
                answer,
                detailed,
            });
        }

        if let Some(text) = pick_formatted(goal, neurons) {
            debug!("Aggregated from formatted result");
            return Ok(AggregatedResult {
                summary: text.to_string(),
                answer: Value::String(text.to_string()),
                detailed,
            });
        }

        if is_counting_goal(goal) {
            if let Some(number) = latest_number(neurons) {
                debug!("Aggregated counting goal to {}", number);
                return Ok(AggregatedResult {
                    summary: number.to_string(),
                    answer: number,
                    detailed,
                });
            }
        }

        let steps = summarize_steps(neurons);
        let prompt = if is_counting_goal(goal) || factual_pattern().is_match(goal) {
            format!(
                "Answer the goal directly using the step results below. Reply with the answer only.\n\n\
                 Goal: {}\n\nSteps:\n{}\n\nData:\n{}",
                goal,
                steps,
                data_views(neurons)
            )
        } else {
            format!(
                "Summarize what was done for this goal in two or three sentences.\n\n\
                 Goal: {}\n\nSteps:\n{}",
                goal, steps
            )
        };

        match self.reasoner.ask(&prompt, AGGREGATOR_SYSTEM, cancel).await {
            Ok(reply) => {
                let text = reply.trim().to_string();
                Ok(AggregatedResult {
                    summary: text.clone(),
                    answer: Value::String(text),
                    detailed,
                })
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Aggregation call failed, using step summary: {}", e);
                Ok(fallback(neurons))
            }
        }
    }
}

/// Reasoner-free aggregate: the step summary plus the latest usable result
pub fn fallback(neurons: &[Neuron]) -> AggregatedResult {
    let answer = neurons
        .iter()
        .rev()
        .filter(|n| n.succeeded())
        .find_map(|n| n.result.clone())
        .unwrap_or(Value::Null);
    AggregatedResult {
        summary: summarize_steps(neurons),
        answer,
        detailed: neurons
            .iter()
            .map(|n| truncate_detail(n.result.as_ref().unwrap_or(&Value::Null)))
            .collect(),
    }
}

/// Most recent formatted result; with a quantity constraint, the most recent
/// one whose line count matches it.
fn pick_formatted<'a>(goal: &str, neurons: &'a [Neuron]) -> Option<&'a str> {
    let candidates: Vec<&str> = neurons
        .iter()
        .filter(|n| n.succeeded())
        .filter_map(|n| n.result.as_ref().and_then(formatted_text))
        .collect();

    if let Some(n) = quantity_constraint(goal) {
        if let Some(text) = candidates.iter().rev().find(|t| line_count(t) == n).copied() {
            return Some(text);
        }
    }
    candidates.last().copied()
}

fn formatted_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if s.trim().contains(char::is_whitespace) => Some(s.as_str()),
        Value::Object(obj) => FORMATTED_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty()),
        _ => None,
    }
}

fn line_count(text: &str) -> usize {
    text.lines().filter(|l| !l.trim().is_empty()).count()
}

fn latest_number(neurons: &[Neuron]) -> Option<Value> {
    neurons
        .iter()
        .rev()
        .filter(|n| n.succeeded())
        .filter_map(|n| n.result.as_ref())
        .find_map(|v| match v {
            Value::Number(_) => Some(v.clone()),
            Value::Object(obj) => {
                let mut numbers = obj.values().filter(|x| x.is_number());
                match (numbers.next(), numbers.next()) {
                    (Some(n), None) => Some(n.clone()),
                    _ => None,
                }
            }
            _ => None,
        })
}

/// One numbered line per neuron: description and a short result summary
pub fn summarize_steps(neurons: &[Neuron]) -> String {
    neurons
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let outcome = match (&n.failure, &n.result) {
                (Some(e), _) => format!("failed: {}", e),
                (None, Some(v)) => one_line(v),
                (None, None) => "no result".to_string(),
            };
            format!("{}. {} -> {}", i + 1, n.description, outcome)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn data_views(neurons: &[Neuron]) -> String {
    neurons
        .iter()
        .filter_map(|n| n.result.as_ref().map(|v| format!("{}: {}", n.id, bounded_view(v, DATA_VIEW_BYTES))))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short human-readable description of a value
pub fn one_line(value: &Value) -> String {
    match value {
        Value::Null => "no result".to_string(),
        Value::String(s) => {
            let first = s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
            if first.chars().count() > STEP_LINE_CHARS {
                format!("{}...", first.chars().take(STEP_LINE_CHARS).collect::<String>())
            } else {
                first.to_string()
            }
        }
        Value::Array(items) => format!("list of {} items", items.len()),
        Value::Object(obj) => {
            if obj.get("success") == Some(&Value::Bool(false)) {
                let error = obj.get("error").and_then(Value::as_str).unwrap_or("unknown error");
                return format!("failed: {}", error);
            }
            let keys: Vec<&str> = obj.keys().take(5).map(String::as_str).collect();
            format!("object with keys {}", keys.join(", "))
        }
        other => other.to_string(),
    }
}

/// Bound a detail payload: long strings and arrays are cut, deep nesting
/// is summarized.
pub fn truncate_detail(value: &Value) -> Value {
    truncate_at(value, 0)
}

fn truncate_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DETAIL_DEPTH {
        return json!(one_line(value));
    }
    match value {
        Value::String(s) if s.chars().count() > MAX_DETAIL_STRING => {
            let kept: String = s.chars().take(MAX_DETAIL_STRING).collect();
            let more = s.chars().count() - MAX_DETAIL_STRING;
            Value::String(format!("{}... ({} more chars)", kept, more))
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_DETAIL_ITEMS)
                .map(|v| truncate_at(v, depth + 1))
                .collect();
            if items.len() > MAX_DETAIL_ITEMS {
                out.push(json!(format!("... ({} more items)", items.len() - MAX_DETAIL_ITEMS)));
            }
            Value::Array(out)
        }
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), truncate_at(v, depth + 1)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedReasoner;
    use std::sync::Arc;
    use std::time::Duration;

    fn aggregator(reasoner: Arc<ScriptedReasoner>) -> ResultAggregator {
        ResultAggregator::new(ReasonerClient::new(reasoner, Duration::from_secs(5), 0.0))
    }

    fn neuron(index: usize, result: Value) -> Neuron {
        let mut n = Neuron::new(0, index, format!("step {}", index));
        n.result = Some(result);
        n
    }

    fn lines(n: usize) -> Value {
        Value::String(
            (1..=n)
                .map(|i| format!("{}. Activity number {}", i, i))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    #[test]
    fn test_quantity_constraint() {
        assert_eq!(quantity_constraint("list my first 3 activities"), Some(3));
        assert_eq!(quantity_constraint("Top 10 segments"), Some(10));
        assert_eq!(quantity_constraint("list all activities"), None);
        assert_eq!(quantity_constraint("summarize my last 5 rides"), None);
        assert_eq!(quantity_constraint("my 3 most recent runs"), None);
    }

    #[tokio::test]
    async fn test_single_neuron_passes_through() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let result = aggregator(reasoner.clone())
            .aggregate("g", &[neuron(0, json!({"a": [1, 2]}))], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, json!({"a": [1, 2]}));
        assert!(reasoner.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_matching_prefers_line_count() {
        let neurons = vec![neuron(0, lines(1)), neuron(1, lines(3)), neuron(2, lines(5))];
        let result = aggregator(Arc::new(ScriptedReasoner::new()))
            .aggregate("list my first 3 activities", &neurons, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, lines(3));
    }

    #[tokio::test]
    async fn test_quantity_tie_takes_most_recent() {
        let mut newer = lines(2);
        if let Value::String(s) = &mut newer {
            s.push_str(" (newer)");
        }
        let neurons = vec![neuron(0, lines(2)), neuron(1, newer.clone()), neuron(2, lines(4))];
        let result = aggregator(Arc::new(ScriptedReasoner::new()))
            .aggregate("show the top 2 runs", &neurons, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, newer);
    }

    #[tokio::test]
    async fn test_without_quantity_takes_latest_formatted() {
        let neurons = vec![neuron(0, lines(1)), neuron(1, json!([1, 2, 3])), neuron(2, lines(4)), neuron(3, json!(9))];
        let result = aggregator(Arc::new(ScriptedReasoner::new()))
            .aggregate("summarize my week", &neurons, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, lines(4));
    }

    #[tokio::test]
    async fn test_counting_goal_returns_number() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let neurons = vec![neuron(0, json!([{"type": "Run"}])), neuron(1, json!(7))];
        let result = aggregator(reasoner.clone())
            .aggregate("How many runs did I do?", &neurons, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, json!(7));
        assert_eq!(result.summary, "7");
        assert!(reasoner.prompts().is_empty());

        let wrapped = vec![neuron(0, json!([1])), neuron(1, json!({"count": 4, "label": "runs"}))];
        let result = aggregator(reasoner)
            .aggregate("count my runs", &wrapped, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, json!(4));
    }

    #[tokio::test]
    async fn test_reasoner_answer_and_failure_fallback() {
        let reasoner = Arc::new(ScriptedReasoner::new().when(&["Answer the goal directly"], "Your longest run was 21 km."));
        let neurons = vec![neuron(0, json!([{"distance": 21000}])), neuron(1, json!({"max": 21000, "min": 3000}))];
        let result = aggregator(reasoner)
            .aggregate("What was my longest run?", &neurons, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer, json!("Your longest run was 21 km."));

        let fb = fallback(&neurons);
        assert!(fb.summary.starts_with("1. step 0 -> list of 1 items"));
        assert_eq!(fb.answer, json!({"max": 21000, "min": 3000}));
    }

    #[test]
    fn test_truncate_detail() {
        let long = json!({"notes": "y".repeat(1500), "laps": (0..30).collect::<Vec<_>>()});
        let cut = truncate_detail(&long);
        let notes = cut["notes"].as_str().unwrap();
        assert!(notes.ends_with("(500 more chars)"));
        let laps = cut["laps"].as_array().unwrap();
        assert_eq!(laps.len(), 21);
        assert_eq!(laps[20], json!("... (10 more items)"));
    }
}
