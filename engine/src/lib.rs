//! Axon Engine Library
//!
//! This library provides the core functionality of the Axon engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Reasoner abstraction layer
pub mod llm;

/// Recursive goal execution
pub mod conductor;

/// Tool catalog and built-in tools
pub mod tools;

/// Logging setup
pub mod telemetry;

/// Command-line interface
pub mod cli;

/// Command handlers for the binary
pub mod handlers;
