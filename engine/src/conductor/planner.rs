//! Goal Decomposer
//!
//! Turns a goal into an ordered, deduplicated list of neurons with a single
//! reasoner call. Also splits conjunctive step descriptions into atomic
//! sub-goals for multi-step fan-out.

use crate::conductor::types::Neuron;
use crate::llm::parse::parse_numbered_list;
use crate::llm::ReasonerClient;
use crate::tools::ToolCatalog;
use sdk::errors::EngineError;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DECOMPOSER_SYSTEM: &str =
    "You plan tool-driven tasks. Reply with a numbered list of steps and nothing else.";

/// Bounds on a multi-step split
const MIN_SUB_GOALS: usize = 2;
const MAX_SUB_GOALS: usize = 3;

pub struct GoalDecomposer {
    reasoner: ReasonerClient,
    max_neurons: usize,
    catalog_limit: usize,
}

impl GoalDecomposer {
    pub fn new(reasoner: ReasonerClient, max_neurons: usize, catalog_limit: usize) -> Self {
        Self {
            reasoner,
            max_neurons,
            catalog_limit,
        }
    }

    /// Decompose `goal` into at most `max_neurons` neurons at `depth`.
    ///
    /// Fails with `DecompositionFailure` when the reply holds no usable step.
    pub async fn decompose(
        &self,
        goal: &str,
        depth: usize,
        catalog: &ToolCatalog,
        hints: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Neuron>, EngineError> {
        let prompt = self.build_prompt(goal, catalog, hints);
        debug!("Decomposing goal at depth {} ({} chars)", depth, prompt.len());

        let reply = match self.reasoner.ask(&prompt, DECOMPOSER_SYSTEM, cancel).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => return Err(EngineError::DecompositionFailure(e.to_string())),
        };

        let steps = dedup_descriptions(parse_numbered_list(&reply), self.max_neurons);
        if steps.is_empty() {
            return Err(EngineError::DecompositionFailure(format!(
                "no usable steps for goal '{}'",
                goal
            )));
        }

        debug!("Goal decomposed into {} steps: {:?}", steps.len(), steps);
        Ok(steps
            .into_iter()
            .enumerate()
            .map(|(i, description)| Neuron::new(depth, i, description))
            .collect())
    }

    fn build_prompt(&self, goal: &str, catalog: &ToolCatalog, hints: &[String]) -> String {
        let mut prompt = format!(
            "Break the goal into at most {} small steps. Each step must be answerable \
             by a single tool call, or apply one action to every item of a list. \
             Use as few steps as possible; if one tool answers the goal, reply with one step.\n\n\
             Goal: {}\n\nAvailable tools:\n{}\n",
            self.max_neurons,
            goal,
            catalog.prompt_slice(self.catalog_limit)
        );
        if !hints.is_empty() {
            prompt.push_str("\nGuidelines:\n");
            for hint in hints {
                prompt.push_str(&format!("- {}\n", hint));
            }
        }
        prompt.push_str("\nReply with a numbered list.");
        prompt
    }

    /// Split a conjunctive step into 2 or 3 atomic sub-goals.
    ///
    /// Returns `None` when the split is unusable (too few or too many parts),
    /// in which case the step is treated as a single task.
    pub async fn split_conjunction(
        &self,
        description: &str,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<String>>, EngineError> {
        let prompt = format!(
            "Split this task into {} or {} independent sub-tasks that can each be done \
             with one tool call.\n\nTask: {}\nOverall goal: {}\n\nReply with a numbered list.",
            MIN_SUB_GOALS, MAX_SUB_GOALS, description, goal
        );

        let reply = match self.reasoner.ask(&prompt, DECOMPOSER_SYSTEM, cancel).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Conjunction split failed, treating as one task: {}", e);
                return Ok(None);
            }
        };

        let parts = dedup_descriptions(parse_numbered_list(&reply), usize::MAX);
        if !(MIN_SUB_GOALS..=MAX_SUB_GOALS).contains(&parts.len()) {
            debug!(
                "Rejected split of '{}' into {} parts",
                description,
                parts.len()
            );
            return Ok(None);
        }
        Ok(Some(parts))
    }
}

/// Case-folded form with trailing punctuation and extra whitespace removed
pub fn normalize(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c.is_ascii_punctuation() && c != ')' && c != ']')
        .trim()
        .to_lowercase()
}

/// Drop blank steps and steps whose normalized text repeats an earlier one,
/// keeping at most `max`.
pub fn dedup_descriptions(items: impl IntoIterator<Item = String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter_map(|item| {
            let key = normalize(&item);
            if key.is_empty() || !seen.insert(key) {
                return None;
            }
            Some(item.trim().to_string())
        })
        .take(max)
        .collect()
}
