//! cmdq - shared-queue worker for multi-step shell command runs
//!
//! Main entry point for the cmdq CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, enqueue, list, show, start, tick};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// cmdq - shared-queue worker for multi-step shell command runs
#[derive(Parser)]
#[command(name = "cmdq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml (default: platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// SQLite database shared by all workers
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the polling worker until interrupted
    Start(start::StartArgs),

    /// Run a single polling pass
    Tick(tick::TickArgs),

    /// Queue a command run from a TOML or JSON file
    Enqueue(enqueue::EnqueueArgs),

    /// List command runs
    List(list::ListArgs),

    /// Show one command run with its step logs
    Show(show::ShowArgs),

    /// Print the effective configuration
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = cmdq_config::load_config_with_options(None, cli.config_dir.as_deref())
        .context("Failed to load configuration")?;
    let mut cmdq_config = loaded.config;
    if let Some(db) = cli.db {
        cmdq_config.store.get_or_insert_with(Default::default).path = Some(db);
    }

    // Console (human-readable, stderr) + daily-rolling JSON file
    let filter = if cli.verbose {
        "cmdq=debug,cmdq_engine=debug,cmdq_store=debug,cmdq_config=debug,info"
    } else {
        "cmdq=info,cmdq_engine=info,cmdq_store=warn,warn"
    };

    let file_appender = tracing_appender::rolling::daily(
        cmdq_config.log_dir(loaded.config_dir.as_deref()),
        "cmdq.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "cmdq=trace,cmdq_engine=trace,cmdq_store=debug,cmdq_config=debug,info",
                )),
        )
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        config: cmdq_config,
        config_dir: loaded.config_dir,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Tick(args) => tick::run(args, &ctx).await,
        Commands::Enqueue(args) => enqueue::run(args, &ctx).await,
        Commands::List(args) => list::run(args, &ctx).await,
        Commands::Show(args) => show::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
