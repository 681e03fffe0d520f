//! Runwright CLI — the host side of paused agent runs.
//!
//! Commands:
//! - `config`   — Show, locate or validate the engine configuration
//! - `inspect`  — Summarize a saved run state snapshot
//! - `decide`   — Record approval decisions into a snapshot

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "runwright",
    about = "Runwright — resumable agent runs with human approval",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Summarize a run state snapshot
    Inspect {
        /// Path to the snapshot JSON
        snapshot: PathBuf,
    },

    /// Approve or reject pending calls in a snapshot
    Decide {
        /// Path to the snapshot JSON
        snapshot: PathBuf,

        /// Call ids to approve
        #[arg(long, value_delimiter = ',')]
        approve: Vec<String>,

        /// Call ids to reject
        #[arg(long, value_delimiter = ',')]
        reject: Vec<String>,

        /// Apply each decision to every future call of the same tool
        #[arg(long)]
        always: bool,

        /// Write the updated snapshot here instead of in place
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print the default config file location
    Path,
    /// Load and validate a configuration file
    Validate {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = runwright_config::EngineConfig::load()
        .map(|c| c.logging)
        .unwrap_or_default();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show { path } => commands::config_cmd::show(path.as_deref())?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate { path } => commands::config_cmd::validate(path.as_deref())?,
        },
        Commands::Inspect { snapshot } => commands::inspect::run(&snapshot)?,
        Commands::Decide {
            snapshot,
            approve,
            reject,
            always,
            out,
        } => {
            let decisions = commands::decide::Decisions {
                approve,
                reject,
                always,
            };
            commands::decide::run(&snapshot, &decisions, out.as_deref())?
        }
    }

    Ok(())
}
