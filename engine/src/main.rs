// Axon recursive goal engine
// Main entry point for the axon binary

use axon_engine::cli::{Cli, Command, ConfigAction};
use axon_engine::config::Config;
use axon_engine::handlers::{
    handle_config_path, handle_config_show, handle_config_validate, handle_run, handle_tools,
    OutputFormat,
};
use axon_engine::telemetry::{init_telemetry, LogFormat};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = if cli.config.is_some() {
        Config::load_from_path(&config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config file; RUST_LOG beats both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry(level, cli.log_format.unwrap_or_else(LogFormat::for_build));
    tracing::info!("Axon Engine v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run { goal, max_depth } => {
            if let Some(depth) = max_depth {
                config.engine.max_depth = depth;
                config.validate_and_process()?;
            }
            tracing::info!("Executing goal: {}", goal);
            handle_run(goal, &config, format).await
        }

        Command::Tools => handle_tools(format),

        Command::Config { action } => {
            tracing::info!("Config management: {:?}", action);
            match action {
                ConfigAction::Show => handle_config_show(&config, format),
                ConfigAction::Path => handle_config_path(&config_path, format),
                ConfigAction::Validate => handle_config_validate(&config_path, format),
            }
        }
    }
}
