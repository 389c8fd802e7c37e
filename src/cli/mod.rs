//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for labelbridge using clap.

pub mod commands;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

/// labelbridge - print queue to label printer watch folder
#[derive(Parser, Debug)]
#[command(name = "labelbridge")]
#[command(version, about, long_about = None)]
#[command(author = "Labelbridge Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "labelbridge.toml", env = "LABELBRIDGE_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LABELBRIDGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Claim ready rows into staged batches
    Select(commands::select::SelectArgs),

    /// Deliver staged batches to the watch folder
    Connect(commands::connect::ConnectArgs),

    /// Select, then connect
    Run(commands::run::RunArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show row and batch states
    Status(commands::status::StatusArgs),

    /// Check that the watch folder is writable
    Probe(commands::probe::ProbeArgs),

    /// Remove archive and quarantine folders past retention
    Prune(commands::prune::PruneArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

impl Cli {
    /// Runs the parsed command and returns the process exit code
    pub async fn execute(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<i32> {
        match &self.command {
            Commands::Select(args) => args.execute(&self.config, shutdown).await,
            Commands::Connect(args) => args.execute(&self.config, shutdown).await,
            Commands::Run(args) => args.execute(&self.config, shutdown).await,
            Commands::ValidateConfig(args) => args.execute(&self.config).await,
            Commands::Status(args) => args.execute(&self.config).await,
            Commands::Probe(args) => args.execute(&self.config).await,
            Commands::Prune(args) => args.execute(&self.config).await,
            Commands::Init(args) => args.execute().await,
        }
    }
}
