//! Conductor Executor
//!
//! Drives one neuron through its state machine:
//!
//! ```text
//! Init -> PreSpawnCheck -> ToolResolution -> ParamBinding -> Invoke
//!      -> [ErrorReflection -> ParamBinding | Invoke]
//!      -> PostSpawnCheck -> Validation -> Accepted | FailedSoft
//! ```
//!
//! Spawning neurons leave `PreSpawnCheck` straight for `Accepted` once their
//! dendrites return. Ordinary failures end in `FailedSoft` with the error
//! kept on the neuron; only hard errors (cancellation, a lost bulk payload)
//! are returned as `Err`.

use crate::conductor::binder::{recover_parameter, BindRequest};
use crate::conductor::classifier::{classify_tool_error, ErrorKind};
use crate::conductor::context::{as_list, bounded_view, replace_list};
use crate::conductor::engine::{Engine, TreeScope};
use crate::conductor::evaluator::Verdict;
use crate::conductor::resolver::tokenize;
use crate::conductor::spawner::{
    conjunction_parts, implies_conjunction, implies_per_item, DendriteSpawner, SpawnMode,
};
use crate::conductor::types::{error_marker, ExecState, Neuron, NeuronKind, RetryState};
use crate::llm::parse::extract_json;
use crate::tools::ToolCatalog;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::{Params, Tool, ToolEnvelope, ToolError, ToolInput, ToolSpec};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

const EXECUTOR_SYSTEM: &str = "You help carry out one step of a larger task. Be concise.";

/// Context shown to reasoning prompts, per entry
const DATA_VIEW_BYTES: usize = 3000;

/// Visible entries handed to a corrective transform
const TRANSFORM_ENTRIES: usize = 4;

static ANALYSIS_INTENT: OnceLock<Regex> = OnceLock::new();

fn analysis_pattern() -> &'static Regex {
    ANALYSIS_INTENT.get_or_init(|| {
        Regex::new(
            r"(?i)\bhow\s+many\b|\bcount\b|\bnumber\s+of\b|\bfilter\b|\bonly\s+(?:the\s+)?(?:ones|those)\b|\bwhich\s+of\b|\btotal\b|\bsum\b",
        )
        .expect("Invalid analysis intent pattern")
    })
}

/// Whether a description asks to count, filter or total data
pub fn implies_analysis(description: &str) -> bool {
    analysis_pattern().is_match(description)
}

/// True when one catalog tool already covers both halves of a conjunction
pub fn catalog_covers_conjunction(description: &str, catalog: &ToolCatalog) -> bool {
    let Some((left, right)) = conjunction_parts(description) else {
        return false;
    };
    let left: HashSet<String> = tokenize(&left).into_iter().collect();
    let right: HashSet<String> = tokenize(&right).into_iter().collect();

    catalog.specs().any(|spec| {
        let words: HashSet<String> = tokenize(&format!("{} {}", spec.name, spec.description))
            .into_iter()
            .collect();
        !words.is_disjoint(&left) && !words.is_disjoint(&right)
    })
}

/// Outcome of the pre-spawn check
enum SpawnPlan {
    Iterate(Vec<Value>),
    Split(Vec<String>),
    Analyze,
    Direct,
}

impl SpawnPlan {
    fn kind(&self) -> NeuronKind {
        match self {
            Self::Iterate(_) => NeuronKind::IterationSpawn,
            Self::Split(_) => NeuronKind::MultiStepSpawn,
            Self::Analyze => NeuronKind::DataAnalysis,
            Self::Direct => NeuronKind::DirectInvoke,
        }
    }
}

/// Settle a failed attempt: consume it, then go to `next` or fail soft
fn consume_attempt(
    neuron: &mut Neuron,
    retry: &mut RetryState,
    max_attempts: usize,
    error: EngineError,
    hint: Option<String>,
    params: &Params,
    next: ExecState,
) -> ExecState {
    retry.record(error.to_string(), hint, params);
    if retry.exhausted(max_attempts) {
        warn!(
            "Neuron {} out of attempts after {}: {}",
            neuron.id, retry.attempt, error
        );
        neuron.failure = Some(error);
        ExecState::FailedSoft
    } else {
        debug!("Neuron {} retrying (attempt {} failed)", neuron.id, retry.attempt);
        next
    }
}

pub struct TaskExecutor<'a> {
    engine: &'a Engine,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run `neuron` to a terminal state and persist its result.
    pub async fn execute(
        &self,
        mut neuron: Neuron,
        goal: &str,
        scope: &TreeScope,
    ) -> Result<Neuron, EngineError> {
        let start = Instant::now();
        let key = scope.keys.neuron_key(neuron.id);
        let max_attempts = self.engine.settings.max_attempts.max(1);
        scope.record_neuron(neuron.depth);

        let mut state = ExecState::Init;
        let mut retry = RetryState::default();
        let mut tool: Option<Arc<dyn Tool>> = None;
        let mut params = Params::new();
        let mut raised: Option<ToolError> = None;
        let mut recovery_used = false;
        let mut diagnosed = false;

        while !state.is_terminal() {
            if scope.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            debug!("Neuron {} -> {:?}", key, state);

            state = match state {
                ExecState::Init => ExecState::PreSpawnCheck,

                ExecState::PreSpawnCheck => {
                    if neuron.corrective {
                        self.transform(&mut neuron, goal, scope).await?;
                        if neuron.failure.is_some() {
                            ExecState::FailedSoft
                        } else {
                            ExecState::Accepted
                        }
                    } else {
                        let plan = self.pre_spawn_check(&neuron, goal, scope).await?;
                        neuron.kind = Some(plan.kind());
                        self.spawn_or_continue(&mut neuron, &key, goal, plan, scope)
                            .await?
                    }
                }

                ExecState::ToolResolution => {
                    let kind = neuron.kind.unwrap_or(NeuronKind::DirectInvoke);
                    match self
                        .engine
                        .resolver
                        .resolve(
                            &neuron.description,
                            goal,
                            &self.engine.catalog,
                            kind,
                            scope.cancel(),
                        )
                        .await
                    {
                        Ok(resolved) => {
                            debug!("Neuron {} resolved to {}", key, resolved.name());
                            neuron.tool = Some(resolved.name().to_string());
                            tool = Some(resolved);
                            ExecState::ParamBinding
                        }
                        Err(e) if e.is_hard() => return Err(e),
                        Err(e) => {
                            warn!("Neuron {}: {}", key, e);
                            neuron.failure = Some(e);
                            ExecState::FailedSoft
                        }
                    }
                }

                ExecState::ParamBinding => {
                    let Some(current) = tool.as_ref() else {
                        neuron.failure = Some(EngineError::ToolNotFound(neuron.description.clone()));
                        state = ExecState::FailedSoft;
                        continue;
                    };
                    let request = BindRequest {
                        description: &neuron.description,
                        goal,
                        retry: &retry,
                    };
                    match self.engine.binder.bind(current.spec(), &request, scope).await {
                        Ok(bound) => {
                            params = bound;
                            ExecState::Invoke
                        }
                        Err(e) if e.is_hard() => return Err(e),
                        Err(e) => consume_attempt(
                            &mut neuron,
                            &mut retry,
                            max_attempts,
                            e,
                            None,
                            &params,
                            ExecState::ParamBinding,
                        ),
                    }
                }

                ExecState::Invoke => {
                    let Some(current) = tool.clone() else {
                        neuron.failure = Some(EngineError::ToolNotFound(neuron.description.clone()));
                        state = ExecState::FailedSoft;
                        continue;
                    };
                    match self.invoke(&current, &params, scope).await? {
                        Ok(value) => match ToolEnvelope::failure_from(&value) {
                            None => {
                                neuron.result = Some(value);
                                ExecState::PostSpawnCheck
                            }
                            Some(envelope) => {
                                let message = envelope
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| format!("{} reported failure", current.name()));
                                neuron.result = Some(value);
                                if envelope.retry {
                                    consume_attempt(
                                        &mut neuron,
                                        &mut retry,
                                        max_attempts,
                                        EngineError::TransientExecution(message),
                                        envelope.hint,
                                        &params,
                                        ExecState::ParamBinding,
                                    )
                                } else {
                                    warn!("Neuron {}: {} refused without retry: {}", key, current.name(), message);
                                    neuron.failure = Some(EngineError::StructuralFailure(message));
                                    ExecState::FailedSoft
                                }
                            }
                        },
                        Err(err) => {
                            raised = Some(err);
                            ExecState::ErrorReflection
                        }
                    }
                }

                ExecState::ErrorReflection => {
                    let (Some(err), Some(current)) = (raised.take(), tool.clone()) else {
                        state = ExecState::ParamBinding;
                        continue;
                    };
                    let message = err.to_string();
                    debug!("Neuron {} reflecting on: {}", key, message);

                    match classify_tool_error(&err) {
                        ErrorKind::MissingParameter(name) if !recovery_used => {
                            recovery_used = true;
                            match recover_parameter(scope, &name).await? {
                                Some(value) => {
                                    info!("Neuron {} recovered `{}` from context", key, name);
                                    params.insert(name, value);
                                    ExecState::Invoke
                                }
                                None => consume_attempt(
                                    &mut neuron,
                                    &mut retry,
                                    max_attempts,
                                    EngineError::ParameterError(message),
                                    None,
                                    &params,
                                    ExecState::ParamBinding,
                                ),
                            }
                        }
                        ErrorKind::ResourceNotFound if !diagnosed => {
                            diagnosed = true;
                            match self
                                .diagnose(&neuron, current.spec(), &params, &message, scope)
                                .await?
                            {
                                Some(fix) => {
                                    info!("Neuron {} correcting {:?} after: {}", key, fix.keys().collect::<Vec<_>>(), message);
                                    let next = consume_attempt(
                                        &mut neuron,
                                        &mut retry,
                                        max_attempts,
                                        EngineError::TransientExecution(message),
                                        None,
                                        &params,
                                        ExecState::Invoke,
                                    );
                                    params.extend(fix);
                                    next
                                }
                                None => {
                                    neuron.failure = Some(EngineError::TransientExecution(message));
                                    ExecState::FailedSoft
                                }
                            }
                        }
                        _ => consume_attempt(
                            &mut neuron,
                            &mut retry,
                            max_attempts,
                            EngineError::TransientExecution(message),
                            None,
                            &params,
                            ExecState::ParamBinding,
                        ),
                    }
                }

                ExecState::PostSpawnCheck => {
                    self.post_spawn_check(&mut neuron, &key, goal, scope).await?;
                    ExecState::Validation
                }

                ExecState::Validation => {
                    let result = neuron.result.clone().unwrap_or(Value::Null);
                    match self
                        .engine
                        .evaluator
                        .validate(&neuron.description, goal, &result, scope.cancel())
                        .await?
                    {
                        Verdict::Valid => {
                            neuron.validated = true;
                            ExecState::Accepted
                        }
                        Verdict::Invalid(reason) => {
                            retry.record(format!("result rejected: {}", reason), None, &params);
                            if neuron.children.is_empty() && !retry.exhausted(max_attempts) {
                                debug!("Neuron {} result rejected, retrying: {}", key, reason);
                                ExecState::ParamBinding
                            } else {
                                warn!("Neuron {} accepting unvalidated result: {}", key, reason);
                                ExecState::Accepted
                            }
                        }
                    }
                }

                ExecState::Accepted | ExecState::FailedSoft => state,
            };
        }

        if state == ExecState::FailedSoft && neuron.failure.is_none() {
            neuron.failure = Some(EngineError::TransientExecution(format!(
                "step '{}' did not complete",
                neuron.description
            )));
        }
        if neuron.result.is_none() {
            neuron.result = neuron.failure.as_ref().map(error_marker);
        }

        if let Some(value) = neuron.result.clone() {
            match scope.ctx.put(&key, value).await {
                Ok(stored) if stored.is_reference() => debug!("Neuron {} result offloaded", key),
                Ok(_) => {}
                Err(e) => warn!("Failed to persist result of {}: {}", key, e),
            }
        }

        info!(
            "Neuron {} {:?} in {:?} (kind: {:?}, tool: {}, validated: {})",
            key,
            state,
            start.elapsed(),
            neuron.kind,
            neuron.tool.as_deref().unwrap_or("-"),
            neuron.validated
        );
        Ok(neuron)
    }

    async fn pre_spawn_check(
        &self,
        neuron: &Neuron,
        goal: &str,
        scope: &TreeScope,
    ) -> Result<SpawnPlan, EngineError> {
        let spawner = DendriteSpawner::new(self.engine);
        let can_spawn = spawner.can_spawn(neuron.depth);
        let list = scope.ctx.latest_list(&scope.keys).await?;
        let description = neuron.description.as_str();

        if can_spawn && implies_per_item(description) {
            if let Some((source, items)) = list.as_ref().filter(|(_, items)| !items.is_empty()) {
                debug!("Neuron {} iterates {} items from '{}'", neuron.id, items.len(), source);
                return Ok(SpawnPlan::Iterate(items.clone()));
            }
        }

        if can_spawn
            && implies_conjunction(description)
            && !catalog_covers_conjunction(description, &self.engine.catalog)
        {
            if let Some(parts) = self
                .engine
                .decomposer
                .split_conjunction(description, goal, scope.cancel())
                .await?
            {
                return Ok(SpawnPlan::Split(parts));
            }
        }

        if implies_analysis(description)
            && list.is_some()
            && self.engine.catalog.analysis_tool().is_some()
        {
            return Ok(SpawnPlan::Analyze);
        }

        Ok(SpawnPlan::Direct)
    }

    async fn spawn_or_continue(
        &self,
        neuron: &mut Neuron,
        key: &str,
        goal: &str,
        plan: SpawnPlan,
        scope: &TreeScope,
    ) -> Result<ExecState, EngineError> {
        let spawner = DendriteSpawner::new(self.engine);
        let report = match plan {
            SpawnPlan::Iterate(items) => {
                spawner
                    .iterate(neuron, key, goal, items, SpawnMode::Iteration, scope)
                    .await?
            }
            SpawnPlan::Split(sub_goals) => spawner.multi_step(neuron, key, &sub_goals, scope).await?,
            SpawnPlan::Analyze | SpawnPlan::Direct => return Ok(ExecState::ToolResolution),
        };

        neuron.validated = report.children.iter().any(|c| c.success);
        if !neuron.validated && !report.children.is_empty() {
            neuron.failure = Some(EngineError::TransientExecution(format!(
                "all {} dendrites failed",
                report.children.len()
            )));
        }
        neuron.result = Some(report.value);
        neuron.children = report.children;
        Ok(if neuron.failure.is_some() {
            ExecState::FailedSoft
        } else {
            ExecState::Accepted
        })
    }

    /// Result-based fan-out when a list came back without what the step needs
    async fn post_spawn_check(
        &self,
        neuron: &mut Neuron,
        key: &str,
        goal: &str,
        scope: &TreeScope,
    ) -> Result<(), EngineError> {
        let spawner = DendriteSpawner::new(self.engine);
        if !spawner.can_spawn(neuron.depth) || !implies_per_item(&neuron.description) {
            return Ok(());
        }
        let Some(items) = neuron
            .result
            .as_ref()
            .and_then(as_list)
            .filter(|items| !items.is_empty())
            .cloned()
        else {
            return Ok(());
        };

        if !spawner
            .needs_enrichment(&neuron.description, goal, &items, scope.cancel())
            .await?
        {
            return Ok(());
        }

        let report = spawner
            .iterate(neuron, key, goal, items, SpawnMode::ResultBased, scope)
            .await?;
        if let (Some(result), Value::Array(enriched)) = (neuron.result.as_mut(), report.value) {
            replace_list(result, enriched);
        }
        neuron.kind = Some(NeuronKind::IterationSpawn);
        neuron.children = report.children;
        Ok(())
    }

    async fn invoke(
        &self,
        tool: &Arc<dyn Tool>,
        params: &Params,
        scope: &TreeScope,
    ) -> Result<Result<Value, ToolError>, EngineError> {
        let timeout = self.engine.settings.tool_timeout;
        debug!(
            "Invoking {} with {:?}",
            tool.name(),
            params.keys().collect::<Vec<_>>()
        );

        tokio::select! {
            biased;
            _ = scope.cancel().cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(timeout, tool.execute(ToolInput::new(params.clone()))) => {
                Ok(res.unwrap_or_else(|_| {
                    Err(ToolError::Execution(format!(
                        "{} timed out after {}s",
                        tool.name(),
                        timeout.as_secs()
                    )))
                }))
            }
        }
    }

    /// One-shot diagnosis of a not-found error. `Some(fix)` when a parameter
    /// was wrong; `None` when the resource is legitimately absent.
    async fn diagnose(
        &self,
        neuron: &Neuron,
        spec: &ToolSpec,
        params: &Params,
        message: &str,
        scope: &TreeScope,
    ) -> Result<Option<Params>, EngineError> {
        let prompt = format!(
            "Diagnose this tool error.\n\nStep: {}\nTool: {}\nParameters: {}\nError: {}\n\
             Context (structure only):\n{}\n\n\
             Was a parameter value wrong or invented, or does the resource legitimately not exist? \
             Reply with JSON: {{\"cause\": \"wrong_parameter\" or \"absent\", \
             \"fix\": {{parameter: corrected value}}}}",
            neuron.description,
            spec.signature(),
            bounded_view(&Value::Object(params.clone()), DATA_VIEW_BYTES),
            message,
            scope.ctx.preview(&scope.keys, DATA_VIEW_BYTES).await
        );

        let reply = match self
            .engine
            .reasoner
            .ask(&prompt, EXECUTOR_SYSTEM, scope.cancel())
            .await
        {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Error diagnosis failed: {}", e);
                return Ok(None);
            }
        };

        let Some(diagnosis) = extract_json(&reply) else {
            return Ok(None);
        };
        if diagnosis.get("cause").and_then(Value::as_str) == Some("absent") {
            return Ok(None);
        }
        let fix: Params = diagnosis
            .get("fix")
            .and_then(Value::as_object)
            .map(|fix| {
                fix.iter()
                    .filter(|(k, v)| spec.accepts(k) && !v.is_null() && params.get(*k) != Some(*v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok((!fix.is_empty()).then_some(fix))
    }

    /// Reasoner-only rework of data already in context. No tool is called.
    async fn transform(
        &self,
        neuron: &mut Neuron,
        goal: &str,
        scope: &TreeScope,
    ) -> Result<(), EngineError> {
        let mut views = Vec::new();
        for (key, stored) in scope
            .ctx
            .visible_entries(&scope.keys)
            .await
            .into_iter()
            .take(TRANSFORM_ENTRIES)
        {
            let value = scope.ctx.materialize(&stored).await?;
            views.push(format!("[{}] {}", key, bounded_view(&value, DATA_VIEW_BYTES)));
        }
        views.reverse();

        let prompt = format!(
            "Transform the data already fetched to complete this step. Do not call tools or \
             fetch anything new.\n\nStep: {}\nGoal: {}\n\nData:\n{}\n\nReply with the finished output only.",
            neuron.description,
            goal,
            views.join("\n")
        );
        match self
            .engine
            .reasoner
            .ask(&prompt, EXECUTOR_SYSTEM, scope.cancel())
            .await
        {
            Ok(reply) => {
                neuron.kind = Some(NeuronKind::DirectInvoke);
                neuron.result = Some(Value::String(reply.trim().to_string()));
                neuron.validated = true;
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Corrective transform failed: {}", e);
                neuron.failure = Some(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(ToolSpec);

    #[async_trait::async_trait]
    impl Tool for Named {
        fn spec(&self) -> &ToolSpec {
            &self.0
        }

        async fn execute(&self, _input: ToolInput) -> Result<Value, ToolError> {
            Ok(json!(null))
        }
    }

    #[test]
    fn test_analysis_intent() {
        assert!(implies_analysis("Count how many runs were longer than 10km"));
        assert!(implies_analysis("Filter only the ones in Paris"));
        assert!(!implies_analysis("Get my recent activities"));
    }

    #[test]
    fn test_catalog_covering_a_conjunction() {
        let catalog = ToolCatalog::empty().with_tool(Arc::new(Named(ToolSpec::new(
            "get_athlete_stats",
            "Totals for distance and elevation",
        ))));
        assert!(catalog_covers_conjunction(
            "Get both my total distance and my elevation gain",
            &catalog
        ));
        assert!(!catalog_covers_conjunction(
            "Get both my gear and my clubs",
            &catalog
        ));
    }
}
