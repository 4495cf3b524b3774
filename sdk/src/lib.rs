//! Axon SDK
//!
//! Shared library providing the tool trait, tool description types and the
//! engine error taxonomy. This crate is used by the engine and by tool
//! implementations.

/// Tool trait
pub mod tool;

/// Error types and handling
pub mod errors;

/// Tool description, input and envelope types
pub mod types;

// Re-export commonly used types
pub use errors::{AxonErrorExt, EngineError};
pub use tool::Tool;
pub use types::{ParamSpec, Params, ToolEnvelope, ToolError, ToolInput, ToolPermissions, ToolSpec};
