//! Tick command - runs a single polling pass.

use anyhow::Result;
use clap::Args;
use cmdq_engine::Poller;
use console::{Style, style};

use super::Context;

/// Arguments for the tick command.
#[derive(Args, Debug)]
pub struct TickArgs {}

/// Run the tick command.
pub async fn run(_args: TickArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let poller = Poller::new(store, &ctx.engine_config());
    let report = poller.tick().await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Polling pass").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Eligible:"), report.candidates);
    println!("  {} {}", dim.apply_to("Leased:"), report.leased);
    println!(
        "  {} {}",
        dim.apply_to("Completed:"),
        Style::new().green().apply_to(report.completed)
    );
    println!(
        "  {} {}",
        dim.apply_to("Failed:"),
        Style::new().red().apply_to(report.failed)
    );
    if report.aborted > 0 {
        println!(
            "  {} {}",
            dim.apply_to("Aborted:"),
            Style::new().red().apply_to(report.aborted)
        );
    }
    Ok(())
}
