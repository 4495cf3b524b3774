//! Configuration management
//!
//! This module handles loading, validation, and management of the Axon configuration.
//! Configuration is stored in TOML format at ~/.axon/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Reasoner endpoint, model, sampling temperature and deadline
//! - **engine**: Recursion, fan-out, retry and working-memory limits
//!
//! # Examples
//!
//! ```no_run
//! use axon_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Max depth: {}", config.engine.max_depth);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Reasoner settings
    #[serde(default)]
    pub llm: LLMConfig,

    /// Execution engine limits
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion). Offloaded context
    /// payloads are written under `<data_dir>/refs`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Reasoner configuration (Ollama-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL for the Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for a single reasoner call
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Absolute recursion ceiling. Spawning stops at `max_depth - 1`.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Maximum dendrites per spawn; excess items are dropped
    #[serde(default = "default_max_dendrites")]
    pub max_dendrites: usize,

    /// Attempts per neuron before it fails soft
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Serialized size at or above which a context value is offloaded
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold_bytes: usize,

    /// Cap on neurons produced by one decomposition
    #[serde(default = "default_max_neurons")]
    pub max_neurons: usize,

    /// Dendrites executed concurrently during iteration fan-out
    #[serde(default = "default_dendrite_concurrency")]
    pub dendrite_concurrency: usize,

    /// Deadline for a single tool call
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Score lead that lets the resolver skip the reasoner
    #[serde(default = "default_selection_margin")]
    pub selection_margin: f64,

    /// Number of catalog entries shown to the decomposer
    #[serde(default = "default_catalog_prompt_limit")]
    pub catalog_prompt_limit: usize,

    /// Strategy hints passed to every decomposition
    #[serde(default = "default_strategy_hints")]
    pub strategy_hints: Vec<String>,

    /// Allow the single corrective neuron after a root run
    #[serde(default = "default_true")]
    pub allow_corrective_pass: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_dendrites: default_max_dendrites(),
            max_attempts: default_max_attempts(),
            compaction_threshold_bytes: default_compaction_threshold(),
            max_neurons: default_max_neurons(),
            dendrite_concurrency: default_dendrite_concurrency(),
            tool_timeout_secs: default_tool_timeout(),
            selection_margin: default_selection_margin(),
            catalog_prompt_limit: default_catalog_prompt_limit(),
            strategy_hints: default_strategy_hints(),
            allow_corrective_pass: true,
        }
    }
}

impl EngineConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.axon/data")
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_depth() -> usize {
    5
}

fn default_max_dendrites() -> usize {
    50
}

fn default_max_attempts() -> usize {
    3
}

fn default_compaction_threshold() -> usize {
    5 * 1024
}

fn default_max_neurons() -> usize {
    4
}

fn default_dendrite_concurrency() -> usize {
    4
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_selection_margin() -> f64 {
    2.0
}

fn default_catalog_prompt_limit() -> usize {
    20
}

fn default_strategy_hints() -> Vec<String> {
    vec![
        "Prefer an exact-match aggregation tool over per-item counting.".to_string(),
        "Fetch a list once, then work on the fetched data instead of fetching again.".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.axon/config.toml)
    ///
    /// If the configuration file doesn't exist, writes a default configuration
    /// there first.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.axon/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".axon").join("config.toml"))
    }

    /// Validate bounds and expand paths
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
        if !LOG_LEVELS.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Expected one of: {}",
                self.core.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        self.core.data_dir = expand_tilde(&self.core.data_dir)?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        let engine = &self.engine;
        if engine.max_depth < 1 {
            return Err(EngineError::Config(
                "engine.max_depth must be at least 1".to_string(),
            ));
        }
        if engine.max_attempts < 1 {
            return Err(EngineError::Config(
                "engine.max_attempts must be at least 1".to_string(),
            ));
        }
        if engine.max_neurons < 1 {
            return Err(EngineError::Config(
                "engine.max_neurons must be at least 1".to_string(),
            ));
        }
        if engine.dendrite_concurrency < 1 {
            return Err(EngineError::Config(
                "engine.dendrite_concurrency must be at least 1".to_string(),
            ));
        }
        if engine.compaction_threshold_bytes < 64 {
            return Err(EngineError::Config(format!(
                "engine.compaction_threshold_bytes is too small: {}",
                engine.compaction_threshold_bytes
            )));
        }

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(path: &Path) -> Result<PathBuf, EngineError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(rest))
}
