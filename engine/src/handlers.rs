//! Command handlers
//!
//! One function per CLI command. Each prints in text or JSON form.

use crate::config::Config;
use crate::conductor::{Engine, FsBulkStore};
use crate::llm::OllamaReasoner;
use crate::tools::ToolCatalog;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Tools a run from the command line can use
pub fn default_catalog() -> ToolCatalog {
    ToolCatalog::empty().with_builtin_analysis()
}

/// Run a goal to completion against the configured reasoner.
///
/// Ctrl-C cancels the whole execution tree.
pub async fn handle_run(goal: String, config: &Config, format: OutputFormat) -> Result<()> {
    let reasoner = OllamaReasoner::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )
    .context("Failed to create reasoner")?;

    let bulk = FsBulkStore::new(&config.core.data_dir);
    let engine = Engine::from_config(config, Arc::new(reasoner), default_catalog(), Arc::new(bulk));

    if format == OutputFormat::Text {
        println!("Executing goal: {}", goal);
        println!();
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let outcome = engine.run_goal_with_cancel(&goal, cancel).await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        }
        OutputFormat::Text => {
            if let Some(result) = &outcome.result {
                println!("Result:");
                match &result.answer {
                    serde_json::Value::String(text) => println!("{}", text),
                    other => println!("{}", serde_json::to_string_pretty(other)?),
                }
                println!();
            }
            if outcome.success {
                println!("✓ Goal completed");
            } else if let Some(err) = &outcome.error {
                println!("✗ Goal failed: {}", err);
            } else {
                println!("✗ Goal failed");
            }
            println!("  Neurons: {}", outcome.stats.neurons_executed);
            println!("  Dendrites: {}", outcome.stats.dendrites_spawned);
            println!("  Deepest level: {}", outcome.stats.deepest);
            println!("  Reasoner calls: {}", engine.reasoner().call_count());
        }
    }

    match outcome.error {
        Some(err) if !outcome.success => Err(err.into()),
        _ => Ok(()),
    }
}

/// List the tool catalog
pub fn handle_tools(format: OutputFormat) -> Result<()> {
    let catalog = default_catalog();
    match format {
        OutputFormat::Json => {
            let specs: Vec<_> = catalog.specs().collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
        }
        OutputFormat::Text => {
            println!("Available tools ({}):", catalog.len());
            for spec in catalog.specs() {
                println!("  {}", spec.signature());
                println!("    {}", spec.description);
                println!("    permissions: {}", spec.permissions.describe());
            }
        }
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", json!({ "path": path })),
        OutputFormat::Text => println!("{}", path.display()),
    }
    Ok(())
}

pub fn handle_config_validate(path: &Path, format: OutputFormat) -> Result<()> {
    let result = Config::load_from_path(path);
    match (&result, format) {
        (Ok(_), OutputFormat::Text) => println!("✓ {} is valid", path.display()),
        (Err(e), OutputFormat::Text) => println!("✗ {}: {}", path.display(), e),
        (_, OutputFormat::Json) => println!(
            "{}",
            json!({
                "path": path,
                "valid": result.is_ok(),
                "error": result.as_ref().err().map(|e| e.to_string()),
            })
        ),
    }
    result.map(|_| ()).map_err(Into::into)
}
