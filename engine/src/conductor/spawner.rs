//! Dendrite Spawner
//!
//! Fans a neuron out into recursive sub-runs ("dendrites"):
//!
//! - **Iteration**: the neuron applies to every item of a list already in
//!   context. Each item becomes its own goal, run at `depth + 1`.
//! - **Result-based**: the same mechanics after a tool call, to enrich each
//!   returned item with data the list did not carry.
//! - **Multi-step**: a conjunctive neuron split into 2-3 independent
//!   sub-goals, run in order.
//!
//! Item dendrites run concurrently up to `dendrite_concurrency` and their
//! results come back in input order. One failed dendrite never aborts the
//! batch.

use crate::conductor::engine::{Engine, TreeScope};
use crate::conductor::types::{error_marker, DendriteRef, Neuron, NeuronId, RunOutcome};
use crate::llm::parse::parse_yes_no;
use futures::stream::{self, StreamExt};
use regex::Regex;
use sdk::errors::EngineError;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SPAWNER_SYSTEM: &str = "You plan per-item work for task steps. Answer briefly.";

/// Field an enriched item carries its dendrite's answer in
pub const DENDRITE_RESULT_FIELD: &str = "dendrite_result";

/// Scalar fields lifted out of multi-step sub-results
const MERGE_KEYS: &[&str] = &[
    "after", "before", "start_date", "end_date", "start_time", "end_time", "since", "until",
];

const ITEM_LABEL_CHARS: usize = 200;

static PER_ITEM: OnceLock<Regex> = OnceLock::new();
static CONJUNCTION: OnceLock<Regex> = OnceLock::new();
static CONJUNCTION_SPLIT: OnceLock<Regex> = OnceLock::new();

fn per_item_pattern() -> &'static Regex {
    PER_ITEM.get_or_init(|| {
        Regex::new(r"(?i)\bfor\s+(?:each|every)\b|\beach\s+of\b|\bper[\s-]item\b|\bindividual(?:ly)?\b")
            .expect("Invalid per-item pattern")
    })
}

fn conjunction_pattern() -> &'static Regex {
    CONJUNCTION.get_or_init(|| {
        Regex::new(r"(?i)\bboth\b.+\band\b|\bas\s+well\s+as\b").expect("Invalid conjunction pattern")
    })
}

fn conjunction_split_pattern() -> &'static Regex {
    CONJUNCTION_SPLIT.get_or_init(|| {
        Regex::new(r"(?i)\bas\s+well\s+as\b|\band\b").expect("Invalid conjunction split pattern")
    })
}

/// Whether a description asks for work on every element of a list
pub fn implies_per_item(description: &str) -> bool {
    per_item_pattern().is_match(description)
}

/// Whether a description joins two separate asks ("both X and Y")
pub fn implies_conjunction(description: &str) -> bool {
    conjunction_pattern().is_match(description)
}

/// The two halves of a conjunctive description
pub fn conjunction_parts(description: &str) -> Option<(String, String)> {
    let cleaned = description.replacen("both ", "", 1).replacen("Both ", "", 1);
    let m = conjunction_split_pattern().find(&cleaned)?;
    let left = cleaned[..m.start()].trim();
    let right = cleaned[m.end()..].trim();
    (!left.is_empty() && !right.is_empty()).then(|| (left.to_string(), right.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Before any tool call, over a list already in context
    Iteration,
    /// After a tool call, merging each answer into its source item
    ResultBased,
}

/// What a fan-out produced
#[derive(Debug)]
pub struct SpawnReport {
    pub value: Value,
    pub children: Vec<DendriteRef>,
    /// Items beyond the dendrite limit that were not processed
    pub dropped: usize,
}

struct DendriteRun {
    path: String,
    goal: String,
    outcome: RunOutcome,
}

pub struct DendriteSpawner<'a> {
    engine: &'a Engine,
}

impl<'a> DendriteSpawner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Spawning is allowed while children stay below the depth ceiling
    pub fn can_spawn(&self, depth: usize) -> bool {
        depth + 1 < self.engine.settings.max_depth
    }

    /// Iteration and result-based fan-out over `items`
    pub async fn iterate(
        &self,
        parent: &Neuron,
        parent_key: &str,
        goal: &str,
        mut items: Vec<Value>,
        mode: SpawnMode,
        scope: &TreeScope,
    ) -> Result<SpawnReport, EngineError> {
        let limit = self.engine.settings.max_dendrites;
        let overflow = if items.len() > limit {
            items.split_off(limit)
        } else {
            Vec::new()
        };
        let dropped = overflow.len();
        if dropped > 0 {
            warn!("{}", EngineError::SpawnLimitExceeded { dropped, limit });
        }
        let Some(sample) = items.first() else {
            return Ok(SpawnReport {
                value: Value::Array(Vec::new()),
                children: Vec::new(),
                dropped,
            });
        };

        let template = self
            .item_template(&parent.description, goal, sample, scope.cancel())
            .await?;
        let goals: Vec<String> = items.iter().map(|item| render_item_goal(&template, item)).collect();

        // Items whose goals repeat share the first run's result
        let mut first_run: HashMap<&str, usize> = HashMap::new();
        let mut to_run: Vec<usize> = Vec::new();
        let mut source: Vec<usize> = Vec::with_capacity(goals.len());
        for (i, item_goal) in goals.iter().enumerate() {
            let slot = *first_run.entry(item_goal.as_str()).or_insert_with(|| {
                to_run.push(i);
                to_run.len() - 1
            });
            source.push(slot);
        }

        let depth = parent.depth + 1;
        scope.record_dendrites(to_run.len());
        info!(
            "Neuron {} spawning {} dendrites at depth {} ({} duplicate, {} dropped)",
            parent_key,
            to_run.len(),
            depth,
            items.len() - to_run.len(),
            dropped
        );

        let runs: Vec<DendriteRun> = stream::iter(to_run.iter().copied())
            .map(|i| self.run_item(parent_key, depth, i, &items[i], &goals[i], scope))
            .buffered(self.engine.settings.dendrite_concurrency.max(1))
            .collect()
            .await;

        if scope.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (answers, children) = collect_runs(runs)?;
        let results: Vec<Value> = source.iter().map(|&slot| answers[slot].clone()).collect();
        let failed = children.iter().filter(|c| !c.success).count();
        if failed > 0 {
            warn!("{} of {} dendrites of {} failed", failed, children.len(), parent_key);
        }

        let value = match mode {
            SpawnMode::Iteration => json!({
                "itemsProcessed": items.len(),
                "results": results,
                "items": items,
                "dropped": dropped,
            }),
            SpawnMode::ResultBased => Value::Array(
                items
                    .into_iter()
                    .zip(results)
                    .map(|(item, result)| enrich(item, result))
                    .chain(overflow)
                    .collect(),
            ),
        };

        Ok(SpawnReport {
            value,
            children,
            dropped,
        })
    }

    async fn run_item(
        &self,
        parent_key: &str,
        depth: usize,
        index: usize,
        item: &Value,
        goal: &str,
        scope: &TreeScope,
    ) -> DendriteRun {
        let transient = scope.keys.transient_key(NeuronId::new(depth, index));
        let child = scope.dendrite(parent_key, index, Some(transient.clone()));
        let path = child.keys.path.clone();

        if let Err(e) = scope.ctx.put(&transient, item.clone()).await {
            return DendriteRun {
                path,
                goal: goal.to_string(),
                outcome: RunOutcome::failed(e, None, scope.stats()),
            };
        }
        debug!("Dendrite {} running '{}'", path, goal);
        let outcome = self.engine.run(goal, depth, &child).await;
        scope.ctx.remove(&transient).await;

        DendriteRun {
            path,
            goal: goal.to_string(),
            outcome,
        }
    }

    /// Run 2-3 sub-goals in order and merge their answers
    pub async fn multi_step(
        &self,
        parent: &Neuron,
        parent_key: &str,
        sub_goals: &[String],
        scope: &TreeScope,
    ) -> Result<SpawnReport, EngineError> {
        let depth = parent.depth + 1;
        scope.record_dendrites(sub_goals.len());
        info!(
            "Neuron {} splitting into {} sub-goals at depth {}",
            parent_key,
            sub_goals.len(),
            depth
        );

        let mut runs = Vec::with_capacity(sub_goals.len());
        for (slot, sub_goal) in sub_goals.iter().enumerate() {
            let child = scope.dendrite(parent_key, slot, None);
            let outcome = self.engine.run(sub_goal, depth, &child).await;
            runs.push(DendriteRun {
                path: child.keys.path.clone(),
                goal: sub_goal.clone(),
                outcome,
            });
        }

        if scope.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (answers, children) = collect_runs(runs)?;
        Ok(SpawnReport {
            value: merge_sub_results(answers),
            children,
            dropped: 0,
        })
    }

    /// Two-question check after a list-shaped tool result: which fields the
    /// step needs, and whether the missing ones can do without more calls.
    pub async fn needs_enrichment(
        &self,
        description: &str,
        goal: &str,
        items: &[Value],
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        let available: BTreeSet<String> = items
            .iter()
            .take(5)
            .filter_map(Value::as_object)
            .flat_map(|obj| obj.keys().cloned())
            .collect();
        let available_list = available.iter().cloned().collect::<Vec<_>>().join(", ");

        let prompt = format!(
            "What fields are needed to complete this step for each item?\n\n\
             Step: {}\nGoal: {}\nFields each item already has: {}\n\n\
             Reply with a comma-separated list of field names only.",
            description, goal, available_list
        );
        let Some(reply) = self.ask_or_skip(&prompt, cancel).await? else {
            return Ok(false);
        };

        let missing: Vec<String> = parse_field_list(&reply)
            .into_iter()
            .filter(|f| !available.iter().any(|a| a.eq_ignore_ascii_case(f)))
            .collect();
        if missing.is_empty() {
            return Ok(false);
        }

        let prompt = format!(
            "Can this step be completed from the fetched items without more tool calls?\n\n\
             Step: {}\nMissing fields: {}\nSample item: {}\n\nAnswer YES or NO.",
            description,
            missing.join(", "),
            items.first().map(|i| label_json(i)).unwrap_or_default()
        );
        let Some(reply) = self.ask_or_skip(&prompt, cancel).await? else {
            return Ok(false);
        };

        let needs_more = parse_yes_no(&reply) == Some(false);
        debug!(
            "Enrichment check for '{}': missing {:?}, more calls needed: {}",
            description, missing, needs_more
        );
        Ok(needs_more)
    }

    async fn item_template(
        &self,
        description: &str,
        goal: &str,
        sample: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let prompt = format!(
            "Write a per-item goal template for this step. Put {{item}} where the item goes; \
             it is replaced by the item's id or name.\n\nStep: {}\nGoal: {}\nSample item: {}\n\n\
             Reply with the template only.",
            description,
            goal,
            label_json(sample)
        );

        let reply = self.ask_or_skip(&prompt, cancel).await?.unwrap_or_default();
        let template = reply
            .lines()
            .map(|l| l.trim().trim_matches(|c| c == '`' || c == '"'))
            .find(|l| !l.is_empty())
            .unwrap_or("")
            .to_string();

        if template.contains("{item}") {
            return Ok(template);
        }
        let base = per_item_pattern()
            .find(description)
            .map(|m| description[..m.start()].trim())
            .filter(|b| !b.is_empty())
            .unwrap_or(description);
        debug!("Unusable item template {:?}, using fallback", template);
        Ok(format!("{} for item {{item}}", base))
    }

    /// `None` when the reasoner failed for a reason other than cancellation
    async fn ask_or_skip(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, EngineError> {
        match self.engine.reasoner.ask(prompt, SPAWNER_SYSTEM, cancel).await {
            Ok(reply) => Ok(Some(reply)),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Spawner reasoning call failed: {}", e);
                Ok(None)
            }
        }
    }
}

/// Answers and child refs in run order. A missing bulk payload in any
/// dendrite is surfaced.
fn collect_runs(runs: Vec<DendriteRun>) -> Result<(Vec<Value>, Vec<DendriteRef>), EngineError> {
    let mut answers = Vec::with_capacity(runs.len());
    let mut children = Vec::with_capacity(runs.len());
    for run in runs {
        let answer = dendrite_answer(&run.outcome);
        if let Some(EngineError::ReferenceNotFound(id)) = run.outcome.error {
            return Err(EngineError::ReferenceNotFound(id));
        }
        answers.push(answer);
        children.push(DendriteRef {
            path: run.path,
            goal: run.goal,
            success: run.outcome.success,
        });
    }
    Ok((answers, children))
}

fn dendrite_answer(outcome: &RunOutcome) -> Value {
    if outcome.success {
        return outcome.answer();
    }
    match &outcome.error {
        Some(e) => error_marker(e),
        None => json!({ "success": false }),
    }
}

fn enrich(item: Value, result: Value) -> Value {
    match item {
        Value::Object(mut obj) => {
            obj.insert(DENDRITE_RESULT_FIELD.to_string(), result);
            Value::Object(obj)
        }
        other => json!({ "item": other, DENDRITE_RESULT_FIELD: result }),
    }
}

/// `{"steps": [...]}` plus any time-range fields the sub-results agree on
fn merge_sub_results(answers: Vec<Value>) -> Value {
    let mut merged = Map::new();
    for answer in &answers {
        let Some(obj) = answer.as_object() else {
            continue;
        };
        for key in MERGE_KEYS {
            if let Some(value) = obj.get(*key).filter(|v| !v.is_object() && !v.is_array()) {
                merged.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
    }
    merged.insert("steps".to_string(), Value::Array(answers));
    Value::Object(merged)
}

/// Text substituted for `{item}`: an id, a name, or compact JSON
pub fn item_label(item: &Value) -> String {
    let scalar = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    if let Value::Object(obj) = item {
        for field in ["id", "name", "title"] {
            if let Some(label) = obj.get(field).and_then(scalar) {
                return label;
            }
        }
    }
    scalar(item).unwrap_or_else(|| label_json(item))
}

fn label_json(item: &Value) -> String {
    let text = item.to_string();
    if text.chars().count() > ITEM_LABEL_CHARS {
        format!("{}...", text.chars().take(ITEM_LABEL_CHARS).collect::<String>())
    } else {
        text
    }
}

pub fn render_item_goal(template: &str, item: &Value) -> String {
    template.replace("{item}", &item_label(item))
}

/// Field names from a "a, b, c" or bulleted reply
fn parse_field_list(reply: &str) -> Vec<String> {
    reply
        .split([',', '\n', ';'])
        .map(|f| {
            f.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '.')
                .to_string()
        })
        .filter(|f| !f.is_empty() && !f.contains(char::is_whitespace))
        .collect()
}
