//! Conductor System
//!
//! Recursive goal execution: decomposition into neurons, per-neuron state
//! machine, dendrite fan-out, working memory with compaction, aggregation.

pub mod aggregator;
pub mod binder;
pub mod classifier;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod planner;
pub mod resolver;
pub mod spawner;
pub mod store;
pub mod types;

pub use aggregator::ResultAggregator;
pub use binder::ParamBinder;
pub use context::{ContextStore, DataReference, KeyScope, StoredValue};
pub use engine::{Engine, EngineSettings, TreeScope};
pub use evaluator::Evaluator;
pub use executor::TaskExecutor;
pub use planner::GoalDecomposer;
pub use resolver::ToolResolver;
pub use spawner::DendriteSpawner;
pub use store::{BulkStore, FsBulkStore, MemoryBulkStore};
pub use types::{AggregatedResult, Neuron, NeuronId, NeuronKind, RunOutcome, RunStats};
