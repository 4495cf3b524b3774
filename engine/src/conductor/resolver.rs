//! Tool Resolver
//!
//! Picks the one tool a neuron should call. Catalog tools are scored against
//! the step description; a clear winner is taken directly, otherwise the
//! reasoner chooses among the top candidates and is asked once to confirm.

use crate::conductor::types::NeuronKind;
use crate::llm::parse::parse_yes_no;
use crate::llm::ReasonerClient;
use crate::tools::{is_analysis_tool, ToolCatalog};
use sdk::errors::EngineError;
use sdk::{Tool, ToolSpec};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RESOLVER_SYSTEM: &str = "You select tools for task steps. Answer briefly.";

const TOP_CANDIDATES: usize = 5;
const NAME_MATCH_BONUS: f64 = 3.0;
const ANALYSIS_BOOST: f64 = 5.0;
const ANALYSIS_PENALTY: f64 = 2.0;

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "are", "as", "by", "each", "every", "fetch", "find", "for", "from",
    "get", "give", "how", "in", "is", "it", "its", "list", "many", "me", "my", "of", "on", "or",
    "show", "that", "the", "their", "then", "this", "to", "use", "what", "with", "your",
];

/// A catalog tool with its relevance score
#[derive(Clone)]
pub struct ScoredTool {
    pub tool: Arc<dyn Tool>,
    pub score: f64,
}

impl ScoredTool {
    fn name(&self) -> &str {
        self.tool.name()
    }
}

pub struct ToolResolver {
    reasoner: ReasonerClient,
    margin: f64,
}

impl ToolResolver {
    pub fn new(reasoner: ReasonerClient, margin: f64) -> Self {
        Self { reasoner, margin }
    }

    pub async fn resolve(
        &self,
        description: &str,
        goal: &str,
        catalog: &ToolCatalog,
        kind: NeuronKind,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Tool>, EngineError> {
        if catalog.is_empty() {
            return Err(EngineError::ToolNotFound("the tool catalog is empty".to_string()));
        }

        if kind == NeuronKind::DataAnalysis {
            if let Some(tool) = catalog.analysis_tool() {
                debug!("Analysis step resolved to {}", tool.name());
                return Ok(tool);
            }
        }

        let ranked = rank_tools(description, catalog, kind);
        let top = &ranked[0];
        if ranked.len() == 1 || top.score - ranked[1].score >= self.margin {
            debug!("Selected {} by score {:.1}", top.name(), top.score);
            return Ok(top.tool.clone());
        }

        let chosen = match self.choose(description, goal, &ranked, cancel).await? {
            Some(chosen) => chosen,
            None if top.score > 0.0 => {
                warn!("No usable tool choice for '{}', using best score", description);
                top.clone()
            }
            None => {
                return Err(EngineError::ToolNotFound(format!(
                    "no tool matches '{}'",
                    description
                )))
            }
        };

        let confirmed = self.confirm(description, &chosen, &ranked, cancel).await?;
        if confirmed.name() != chosen.name() {
            info!("Tool choice overridden: {} -> {}", chosen.name(), confirmed.name());
        }
        Ok(confirmed.tool)
    }

    async fn choose(
        &self,
        description: &str,
        goal: &str,
        ranked: &[ScoredTool],
        cancel: &CancellationToken,
    ) -> Result<Option<ScoredTool>, EngineError> {
        let candidates: Vec<String> = ranked
            .iter()
            .map(|c| format!("- {}: {}", c.tool.spec().signature(), c.tool.spec().description))
            .collect();
        let prompt = format!(
            "Choose the single best tool for this step.\n\nStep: {}\nGoal: {}\n\nCandidates:\n{}\n\n\
             Reply with the tool name only.",
            description,
            goal,
            candidates.join("\n")
        );

        match self.reasoner.ask(&prompt, RESOLVER_SYSTEM, cancel).await {
            Ok(reply) => Ok(match_candidate(&reply, ranked, None)),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Tool choice failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Second opinion on `chosen`; may swap it for another candidate once
    async fn confirm(
        &self,
        description: &str,
        chosen: &ScoredTool,
        ranked: &[ScoredTool],
        cancel: &CancellationToken,
    ) -> Result<ScoredTool, EngineError> {
        let others: Vec<&str> = ranked
            .iter()
            .map(ScoredTool::name)
            .filter(|n| *n != chosen.name())
            .collect();
        let spec = chosen.tool.spec();
        let prompt = format!(
            "Is this tool correct for the step?\n\nStep: {}\nTool: {} - {}\nOther candidates: {}\n\n\
             Reply YES, or NO followed by the name of the correct tool.",
            description,
            spec.signature(),
            spec.description,
            others.join(", ")
        );

        let reply = match self.reasoner.ask(&prompt, RESOLVER_SYSTEM, cancel).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Tool confirmation failed, keeping {}: {}", chosen.name(), e);
                return Ok(chosen.clone());
            }
        };

        if parse_yes_no(&reply) == Some(false) {
            if let Some(other) = match_candidate(&reply, ranked, Some(chosen.name())) {
                return Ok(other);
            }
        }
        Ok(chosen.clone())
    }
}

/// Score every catalog tool and keep the top candidates, best first. Ties
/// keep catalog order.
pub fn rank_tools(description: &str, catalog: &ToolCatalog, kind: NeuronKind) -> Vec<ScoredTool> {
    let words: HashSet<String> = tokenize(description).into_iter().collect();
    let mut scored: Vec<ScoredTool> = catalog
        .iter()
        .map(|tool| ScoredTool {
            score: score_tool(&words, tool.spec(), kind),
            tool: tool.clone(),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(TOP_CANDIDATES);
    scored
}

fn score_tool(words: &HashSet<String>, spec: &ToolSpec, kind: NeuronKind) -> f64 {
    let name_tokens = tokenize(&spec.name);
    let mut tool_tokens: HashSet<String> = name_tokens.iter().cloned().collect();
    tool_tokens.extend(tokenize(&spec.description));

    let mut score = words.intersection(&tool_tokens).count() as f64;
    if !name_tokens.is_empty() && name_tokens.iter().all(|t| words.contains(t)) {
        score += NAME_MATCH_BONUS;
    }
    if is_analysis_tool(spec) {
        if kind == NeuronKind::DataAnalysis {
            score += ANALYSIS_BOOST;
        } else {
            score -= ANALYSIS_PENALTY;
        }
    }
    score
}

/// Lowercased, stemmed content words
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Candidate named in `reply`, longest name first so prefixes don't win
fn match_candidate(reply: &str, ranked: &[ScoredTool], exclude: Option<&str>) -> Option<ScoredTool> {
    let mut by_length: Vec<&ScoredTool> = ranked
        .iter()
        .filter(|c| Some(c.name()) != exclude)
        .collect();
    by_length.sort_by_key(|c| std::cmp::Reverse(c.name().len()));
    by_length
        .into_iter()
        .find(|c| reply.contains(c.name()))
        .cloned()
}
