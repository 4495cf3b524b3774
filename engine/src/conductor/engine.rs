//! Conductor Engine
//!
//! Root driver of the recursive execution tree. A run decomposes its goal
//! into neurons, executes them in order against one shared context store,
//! and aggregates the results. Dendrites re-enter [`Engine::run`] one level
//! deeper with their own key scope and a child cancellation token.
//!
//! At the root, one completeness check may append a single corrective
//! neuron that reworks data already fetched.

use crate::config::{Config, EngineConfig};
use crate::conductor::aggregator::{self, ResultAggregator};
use crate::conductor::binder::ParamBinder;
use crate::conductor::context::{ContextStore, KeyScope};
use crate::conductor::evaluator::Evaluator;
use crate::conductor::executor::TaskExecutor;
use crate::conductor::planner::GoalDecomposer;
use crate::conductor::resolver::ToolResolver;
use crate::conductor::store::BulkStore;
use crate::conductor::types::{Neuron, NeuronId, RunOutcome, RunStats};
use crate::llm::{Reasoner, ReasonerClient};
use crate::tools::ToolCatalog;
use futures::future::BoxFuture;
use sdk::errors::EngineError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runtime limits, resolved from [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_depth: usize,
    pub max_dendrites: usize,
    pub max_attempts: usize,
    pub compaction_threshold: usize,
    pub max_neurons: usize,
    pub dendrite_concurrency: usize,
    pub tool_timeout: Duration,
    pub selection_margin: f64,
    pub catalog_prompt_limit: usize,
    pub strategy_hints: Vec<String>,
    pub allow_corrective_pass: bool,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_dendrites: config.max_dendrites,
            max_attempts: config.max_attempts,
            compaction_threshold: config.compaction_threshold_bytes,
            max_neurons: config.max_neurons,
            dendrite_concurrency: config.dendrite_concurrency,
            tool_timeout: config.tool_timeout(),
            selection_margin: config.selection_margin,
            catalog_prompt_limit: config.catalog_prompt_limit,
            strategy_hints: config.strategy_hints.clone(),
            allow_corrective_pass: config.allow_corrective_pass,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug, Default)]
struct TreeStats {
    neurons: AtomicUsize,
    dendrites: AtomicUsize,
    deepest: AtomicUsize,
}

/// Everything one node of the tree shares with, or inherits from, its parent
#[derive(Clone)]
pub struct TreeScope {
    pub ctx: Arc<ContextStore>,
    pub keys: KeyScope,
    cancel: CancellationToken,
    stats: Arc<TreeStats>,
}

impl TreeScope {
    pub fn root(ctx: Arc<ContextStore>, cancel: CancellationToken) -> Self {
        Self::nested(ctx, cancel, KeyScope::root())
    }

    /// Scope for a run that starts below the root, e.g. a resumed dendrite
    pub fn nested(ctx: Arc<ContextStore>, cancel: CancellationToken, keys: KeyScope) -> Self {
        Self {
            ctx,
            keys,
            cancel,
            stats: Arc::new(TreeStats::default()),
        }
    }

    /// Scope of the dendrite in `slot` under `parent_key`
    pub fn dendrite(&self, parent_key: &str, slot: usize, item_key: Option<String>) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            keys: self.keys.child(parent_key, slot, item_key),
            cancel: self.cancel.child_token(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn neuron_key(&self, id: NeuronId) -> String {
        self.keys.neuron_key(id)
    }

    pub fn transient_key(&self, id: NeuronId) -> String {
        self.keys.transient_key(id)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            neurons_executed: self.stats.neurons.load(Ordering::Relaxed),
            dendrites_spawned: self.stats.dendrites.load(Ordering::Relaxed),
            deepest: self.stats.deepest.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_neuron(&self, depth: usize) {
        self.stats.neurons.fetch_add(1, Ordering::Relaxed);
        self.stats.deepest.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_dendrites(&self, count: usize) {
        self.stats.dendrites.fetch_add(count, Ordering::Relaxed);
    }
}

pub struct Engine {
    pub(crate) settings: EngineSettings,
    pub(crate) catalog: ToolCatalog,
    pub(crate) reasoner: ReasonerClient,
    bulk: Arc<dyn BulkStore>,
    pub(crate) decomposer: GoalDecomposer,
    pub(crate) resolver: ToolResolver,
    pub(crate) binder: ParamBinder,
    pub(crate) evaluator: Evaluator,
    aggregator: ResultAggregator,
}

impl Engine {
    pub fn new(
        reasoner: ReasonerClient,
        catalog: ToolCatalog,
        bulk: Arc<dyn BulkStore>,
        settings: EngineSettings,
    ) -> Self {
        info!(
            "Engine ready: {} tools, reasoner {}, max depth {}",
            catalog.len(),
            reasoner.provider_name(),
            settings.max_depth
        );
        Self {
            decomposer: GoalDecomposer::new(
                reasoner.clone(),
                settings.max_neurons,
                settings.catalog_prompt_limit,
            ),
            resolver: ToolResolver::new(reasoner.clone(), settings.selection_margin),
            binder: ParamBinder::new(reasoner.clone()),
            evaluator: Evaluator::new(reasoner.clone()),
            aggregator: ResultAggregator::new(reasoner.clone()),
            settings,
            catalog,
            reasoner,
            bulk,
        }
    }

    pub fn from_config(
        config: &Config,
        reasoner: Arc<dyn Reasoner>,
        catalog: ToolCatalog,
        bulk: Arc<dyn BulkStore>,
    ) -> Self {
        let client = ReasonerClient::new(
            reasoner,
            Duration::from_secs(config.llm.timeout_secs),
            config.llm.temperature,
        );
        Self::new(client, catalog, bulk, EngineSettings::from(&config.engine))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn reasoner(&self) -> &ReasonerClient {
        &self.reasoner
    }

    /// Fresh context store for one top-level run
    pub fn new_context(&self) -> Arc<ContextStore> {
        Arc::new(ContextStore::new(
            Arc::clone(&self.bulk),
            self.settings.compaction_threshold,
        ))
    }

    pub async fn run_goal(&self, goal: &str) -> RunOutcome {
        self.run_goal_with_cancel(goal, CancellationToken::new()).await
    }

    /// Top-level entry point: a fresh context, the root scope and depth 0
    pub async fn run_goal_with_cancel(&self, goal: &str, cancel: CancellationToken) -> RunOutcome {
        let start = Instant::now();
        let ctx = self.new_context();
        info!("Running goal (run {}): {}", ctx.run_id(), goal);

        let scope = TreeScope::root(ctx, cancel);
        let outcome = self.run(goal, 0, &scope).await;

        info!(
            "Goal finished in {:?}: success={}, neurons={}, dendrites={}, deepest={}",
            start.elapsed(),
            outcome.success,
            outcome.stats.neurons_executed,
            outcome.stats.dendrites_spawned,
            outcome.stats.deepest
        );
        outcome
    }

    /// Run `goal` at `depth` within `scope`. Boxed so dendrites can recurse.
    pub fn run<'a>(
        &'a self,
        goal: &'a str,
        depth: usize,
        scope: &'a TreeScope,
    ) -> BoxFuture<'a, RunOutcome> {
        Box::pin(async move {
            if depth > self.settings.max_depth {
                let err = EngineError::DepthLimitExceeded {
                    depth,
                    max: self.settings.max_depth,
                };
                warn!("{}", err);
                return RunOutcome::failed(err, None, scope.stats());
            }
            if scope.is_cancelled() {
                return RunOutcome::failed(EngineError::Cancelled, None, scope.stats());
            }

            let neurons = match self
                .decomposer
                .decompose(
                    goal,
                    depth,
                    &self.catalog,
                    &self.settings.strategy_hints,
                    scope.cancel(),
                )
                .await
            {
                Ok(neurons) => neurons,
                Err(EngineError::DecompositionFailure(reason)) if depth > 0 => {
                    warn!("Decomposition failed at depth {}, running goal as one step: {}", depth, reason);
                    vec![Neuron::new(depth, 0, goal)]
                }
                Err(e) => return RunOutcome::failed(e, None, scope.stats()),
            };
            debug!("Depth {} goal split into {} neurons", depth, neurons.len());

            let executor = TaskExecutor::new(self);
            let mut done = Vec::with_capacity(neurons.len() + 1);
            for neuron in neurons {
                match executor.execute(neuron, goal, scope).await {
                    Ok(neuron) => done.push(neuron),
                    Err(e) => return self.abort(e, &done, scope),
                }
            }

            let mut result = match self.aggregator.aggregate(goal, &done, scope.cancel()).await {
                Ok(result) => result,
                Err(e) => return self.abort(e, &done, scope),
            };

            if depth == 0 && self.settings.allow_corrective_pass {
                match self.evaluator.completeness(goal, &result, scope.cancel()).await {
                    Ok(Some(step)) => {
                        info!("Goal incomplete, appending corrective step: {}", step);
                        let corrective = Neuron::corrective(depth, done.len(), step);
                        match executor.execute(corrective, goal, scope).await {
                            Ok(neuron) => done.push(neuron),
                            Err(e) => return self.abort(e, &done, scope),
                        }
                        result = match self.aggregator.aggregate(goal, &done, scope.cancel()).await {
                            Ok(result) => result,
                            Err(e) => return self.abort(e, &done, scope),
                        };
                    }
                    Ok(None) => {}
                    Err(e) => return self.abort(e, &done, scope),
                }
            }

            let success = done.iter().any(Neuron::succeeded);
            let error = if success {
                None
            } else {
                done.iter_mut().find_map(|n| n.failure.take())
            };

            RunOutcome {
                success,
                result: Some(result),
                error,
                stats: scope.stats(),
            }
        })
    }

    /// Hard error: surface it along with whatever settled before it
    fn abort(&self, error: EngineError, done: &[Neuron], scope: &TreeScope) -> RunOutcome {
        warn!("Run aborted after {} neurons: {}", done.len(), error);
        let partial = (!done.is_empty()).then(|| aggregator::fallback(done));
        RunOutcome::failed(error, partial, scope.stats())
    }
}
