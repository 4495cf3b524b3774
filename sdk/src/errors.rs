//! Error types and handling
//!
//! This module provides the error types used throughout the Axon engine.
//! All errors implement the `AxonErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Propagation
//!
//! Almost every failure that happens while executing a single neuron is caught
//! at the executor boundary and converted into a result value. Only the
//! variants for which [`EngineError::is_hard`] returns `true` travel up to the
//! caller of a run.

use std::time::Duration;
use thiserror::Error;

/// Trait for Axon error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait AxonErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by the executor.
    /// Non-recoverable errors end the neuron (or the run) that raised them.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Planning**: the goal could not be decomposed
/// - **Tooling**: tool lookup, parameter binding and invocation failures
/// - **Fan-out**: depth and dendrite limits
/// - **Storage**: working-memory offload inconsistencies
/// - **Runtime**: cancellation, deadlines, reasoner transport, configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{AxonErrorExt, EngineError};
///
/// let error = EngineError::ParameterError("activity_id".to_string());
/// assert!(error.is_recoverable());
/// assert!(!error.is_hard());
///
/// let fatal = EngineError::ReferenceNotFound("ab12".to_string());
/// assert!(fatal.is_hard());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Planning errors
    #[error("Decomposition failed: {0}")]
    DecompositionFailure(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    #[error("Tool reported a non-retryable failure: {0}")]
    StructuralFailure(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    // Fan-out errors
    #[error("Spawn limit exceeded: {dropped} items dropped (limit {limit})")]
    SpawnLimitExceeded { dropped: usize, limit: usize },

    #[error("Depth limit exceeded: depth {depth} > max {max}")]
    DepthLimitExceeded { depth: usize, max: usize },

    // Storage errors
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Runtime errors
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reasoner error: {0}")]
    Reasoner(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error must propagate past the executor boundary instead of
    /// being folded into a neuron result.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::DecompositionFailure(_)
                | Self::ReferenceNotFound(_)
                | Self::Cancelled
                | Self::DepthLimitExceeded { .. }
        )
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DecompositionFailure(_) => "decomposition_failure",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ParameterError(_) => "parameter_error",
            Self::TransientExecution(_) => "transient_execution_error",
            Self::StructuralFailure(_) => "structural_failure",
            Self::ValidationFailure(_) => "validation_failure",
            Self::SpawnLimitExceeded { .. } => "spawn_limit_exceeded",
            Self::DepthLimitExceeded { .. } => "depth_limit_exceeded",
            Self::ReferenceNotFound(_) => "reference_not_found",
            Self::Storage(_) => "storage_error",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Reasoner(_) => "reasoner_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }
}

impl AxonErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::DecompositionFailure(_) => "The goal could not be broken into steps. Try rephrasing it",
            Self::ToolNotFound(_) => "No available tool matches this step",
            Self::ParameterError(_) => "A required tool parameter could not be determined",
            Self::TransientExecution(_) => "A tool call failed. It may succeed on retry",
            Self::StructuralFailure(_) => "A tool rejected the request and asked not to retry",
            Self::ValidationFailure(_) => "The step result did not match what was asked",
            Self::SpawnLimitExceeded { .. } => "Too many items to process. Some were skipped",
            Self::DepthLimitExceeded { .. } => "Task nesting is too deep. Try a simpler goal",
            Self::ReferenceNotFound(_) => "Stored intermediate data is missing. Re-run the goal",
            Self::Storage(_) => "Failed to read or write intermediate data",
            Self::Cancelled => "Execution was cancelled",
            Self::Timeout(_) => "An operation took too long to respond. Try again",
            Self::Reasoner(_) => "Reasoning provider unavailable. Check your configuration and network",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::DecompositionFailure(_)
            | Self::ToolNotFound(_)
            | Self::StructuralFailure(_)
            | Self::ReferenceNotFound(_)
            | Self::Cancelled
            | Self::DepthLimitExceeded { .. }
            | Self::Config(_) => false,

            _ => true,
        }
    }
}
