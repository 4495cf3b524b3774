//! Conductor Evaluator
//!
//! Judges neuron results against their step description and, at the root,
//! whether the aggregated answer covers the whole goal.

use crate::conductor::context::bounded_view;
use crate::conductor::types::AggregatedResult;
use crate::llm::parse::parse_yes_no;
use crate::llm::ReasonerClient;
use sdk::errors::EngineError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EVALUATOR_SYSTEM: &str = "You check task results. Start every reply with YES or NO.";

/// Largest result shown verbatim in a prompt
const RESULT_VIEW_BYTES: usize = 1500;

/// Prefix that keeps a corrective step away from fetching
pub const CORRECTIVE_PREFIX: &str = "Using only the data already fetched, ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

/// Verdict readable from the result's own shape, if any
pub fn structural_verdict(result: &Value) -> Option<Verdict> {
    let obj = result.as_object()?;
    let error_text = || {
        obj.get("error")
            .filter(|e| !e.is_null())
            .map(|e| e.as_str().map(String::from).unwrap_or_else(|| e.to_string()))
    };

    if let Some(success) = obj.get("success").and_then(Value::as_bool) {
        return Some(if success {
            Verdict::Valid
        } else {
            Verdict::Invalid(error_text().unwrap_or_else(|| "tool reported failure".to_string()))
        });
    }
    error_text().map(Verdict::Invalid)
}

pub struct Evaluator {
    reasoner: ReasonerClient,
}

impl Evaluator {
    pub fn new(reasoner: ReasonerClient) -> Self {
        Self { reasoner }
    }

    /// Check a neuron result. Only cancellation is returned as an error; an
    /// unusable reply counts as valid.
    pub async fn validate(
        &self,
        description: &str,
        goal: &str,
        result: &Value,
        cancel: &CancellationToken,
    ) -> Result<Verdict, EngineError> {
        // 1. Explicit success flag or error
        if let Some(verdict) = structural_verdict(result) {
            return Ok(verdict);
        }

        // 2. Nothing came back
        if result.is_null() {
            return Ok(Verdict::Invalid("empty result".to_string()));
        }

        // 3. Ask
        let prompt = format!(
            "Does the result satisfy this step?\n\nStep: {}\nOverall goal: {}\nResult: {}\n\n\
             Answer YES or NO, then one short reason.",
            description,
            goal,
            bounded_view(result, RESULT_VIEW_BYTES)
        );
        match self.reasoner.ask(&prompt, EVALUATOR_SYSTEM, cancel).await {
            Ok(reply) => match parse_yes_no(&reply) {
                Some(false) => Ok(Verdict::Invalid(reason(&reply))),
                _ => Ok(Verdict::Valid),
            },
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Validation call failed, accepting result: {}", e);
                Ok(Verdict::Valid)
            }
        }
    }

    /// Goal-level completeness check. Returns the description of one
    /// corrective step when the answer falls short.
    pub async fn completeness(
        &self,
        goal: &str,
        result: &AggregatedResult,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, EngineError> {
        let prompt = format!(
            "Is the goal fully answered by this result?\n\nGoal: {}\nAnswer: {}\n\n\
             Reply YES if it is. Otherwise reply NO followed by one step that formats or \
             transforms the data already fetched to finish the answer. Never fetch new data.",
            goal,
            bounded_view(&result.answer, RESULT_VIEW_BYTES)
        );

        let reply = match self.reasoner.ask(&prompt, EVALUATOR_SYSTEM, cancel).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Completeness check failed, keeping answer: {}", e);
                return Ok(None);
            }
        };

        if parse_yes_no(&reply) != Some(false) {
            return Ok(None);
        }
        let step = reason(&reply);
        if step.is_empty() {
            debug!("Completeness check said NO without a corrective step");
            return Ok(None);
        }
        Ok(Some(format!("{}{}", CORRECTIVE_PREFIX, step)))
    }
}

/// Text after the leading YES/NO
fn reason(reply: &str) -> String {
    let trimmed = reply.trim().trim_start_matches(|c: char| !c.is_alphanumeric());
    let rest = trimmed.trim_start_matches(|c: char| c.is_alphanumeric());
    rest.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .trim()
        .to_string()
}
