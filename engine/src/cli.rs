//! CLI interface for Axon
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use crate::telemetry::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Axon recursive goal engine
///
/// Breaks a natural-language goal into steps, calls tools for each step and
/// fans out over lists when a step applies to every item.
#[derive(Parser, Debug)]
#[command(name = "axon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Log line format (pretty, compact, json)
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a goal immediately
    Run {
        /// The goal to execute
        goal: String,

        /// Override the recursion ceiling for this run
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// List the tools available to runs
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Validate configuration file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["axon", "tools"]);
        assert!(matches!(cli.command, Command::Tools));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["axon", "--json", "--log", "debug", "tools"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::parse_from(["axon", "--log-format", "json", "tools"]);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(Cli::try_parse_from(["axon", "--log-format", "xml", "tools"]).is_err());
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "axon",
            "run",
            "get kudos givers for each of my last 5 activities",
            "--max-depth",
            "3",
        ]);
        if let Command::Run { goal, max_depth } = cli.command {
            assert_eq!(goal, "get kudos givers for each of my last 5 activities");
            assert_eq!(max_depth, Some(3));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["axon", "--config", "/tmp/axon.toml", "config", "show"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/axon.toml")));
        if let Command::Config { action } = cli.command {
            assert!(matches!(action, ConfigAction::Show));
        } else {
            panic!("Expected Config command");
        }
    }
}
