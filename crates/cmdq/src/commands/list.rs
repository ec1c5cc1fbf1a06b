//! List command - lists command runs.

use anyhow::Result;
use clap::Args;
use cmdq_store::{CommandRun, RunFilter, RunStatus, RunStorage};
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only runs not yet completed
    #[arg(long, conflicts_with = "failed")]
    pub pending: bool,

    /// Only failed runs
    #[arg(long)]
    pub failed: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    id: &'a str,
    name: Option<&'a str>,
    status: RunStatus,
    directory: String,
    steps: usize,
    failed_step: Option<&'a str>,
    add_date: String,
}

impl<'a> From<&'a CommandRun> for RunSummary<'a> {
    fn from(run: &'a CommandRun) -> Self {
        Self {
            id: &run.id,
            name: run.name.as_deref(),
            status: run.status(),
            directory: run.directory_path.display().to_string(),
            steps: run.steps.len(),
            failed_step: run.failed_step.as_deref(),
            add_date: run.add_date.to_rfc3339(),
        }
    }
}

/// Run the list command.
pub async fn run(args: ListArgs, ctx: &Context) -> Result<()> {
    let filter = if args.pending {
        RunFilter::Pending
    } else if args.failed {
        RunFilter::Failed
    } else {
        RunFilter::All
    };

    let store = ctx.open_store()?;
    let runs = store.list_runs(filter)?;

    if ctx.json_output {
        let summaries: Vec<RunSummary<'_>> = runs.iter().map(RunSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No command runs");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Command runs").bold());
    println!("{}", dim.apply_to("─".repeat(60)));
    for run in &runs {
        let status = run.status();
        println!(
            "  {} {}  {}  {}",
            status_style(status).apply_to(format!("{:<10}", status.to_string())),
            run.id,
            run.name.as_deref().unwrap_or("-"),
            dim.apply_to(run.add_date.format("%Y-%m-%d %H:%M:%S"))
        );
        if let Some(step) = &run.failed_step {
            println!("      {} {}", dim.apply_to("failed at:"), step);
        }
    }
    Ok(())
}

pub(crate) fn status_style(status: RunStatus) -> Style {
    match status {
        RunStatus::Pending => Style::new().yellow(),
        RunStatus::Processing => Style::new().cyan(),
        RunStatus::Completed => Style::new().green(),
        RunStatus::Failed => Style::new().red(),
    }
}
