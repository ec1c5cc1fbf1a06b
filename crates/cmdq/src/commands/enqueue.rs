//! Enqueue command - queues a command run from a file.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Args;
use cmdq_store::{NewCommandRun, RunStorage};
use console::Style;
use serde::Serialize;

use super::Context;

/// Arguments for the enqueue command.
#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Run file (`.toml` or `.json`)
    pub file: PathBuf,

    /// Working directory for every step (overrides the file's `directory`)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct EnqueueOutput {
    id: String,
    steps: usize,
}

/// Run the enqueue command.
pub async fn run(args: EnqueueArgs, ctx: &Context) -> Result<()> {
    let mut new_run = read_run_file(&args.file)?;
    if let Some(directory) = args.directory {
        new_run.directory = directory;
    }

    let store = ctx.open_store()?;
    let run = store.insert_run(new_run)?;

    if ctx.json_output {
        let output = EnqueueOutput {
            id: run.id.clone(),
            steps: run.steps.len(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{} Queued run {} ({} steps)",
            Style::new().green().apply_to("✓"),
            run.id,
            run.steps.len()
        );
        if ctx.verbose {
            println!("  directory: {}", run.directory_path.display());
        }
    }
    Ok(())
}

fn read_run_file(path: &Path) -> Result<NewCommandRun> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run file {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let run = match ext.as_deref() {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("Invalid JSON run file {}", path.display()))?,
        Some("toml") | None => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML run file {}", path.display()))?,
        Some(other) => bail!("Unsupported run file extension '.{other}' (use .toml or .json)"),
    };
    Ok(run)
}
