//! Show command - prints one command run with its step logs.

use anyhow::Result;
use clap::Args;
use cmdq_store::RunStorage;
use console::{Style, style};

use super::Context;
use super::list::status_style;

/// Arguments for the show command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Run ID
    pub id: String,
}

/// Run the show command.
pub async fn run(args: ShowArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let run = store.get_run(&args.id)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let status = run.status();
    println!();
    println!("{} {}", style("Run").bold(), run.id);
    println!("{}", dim.apply_to("─".repeat(60)));
    if let Some(name) = &run.name {
        println!("  {} {}", dim.apply_to("Name:"), name);
    }
    println!("  {} {}", dim.apply_to("Status:"), status_style(status).apply_to(status));
    println!("  {} {}", dim.apply_to("Directory:"), run.directory_path.display());
    println!("  {} {}", dim.apply_to("Added:"), run.add_date.to_rfc3339());
    if let Some(at) = run.completed_at {
        println!("  {} {}", dim.apply_to("Finished:"), at.to_rfc3339());
    }
    if let Some(step) = &run.failed_step {
        println!("  {} {}", dim.apply_to("Failed step:"), step);
    }
    if let Some(message) = &run.error_message {
        println!("  {} {}", dim.apply_to("Error:"), message);
    }

    for step in run.sorted_steps() {
        let marker = match (step.completed, step.error) {
            (true, false) => Style::new().green().apply_to("✓"),
            (true, true) => Style::new().red().apply_to("✗"),
            (false, _) => dim.apply_to("·"),
        };
        println!();
        println!(
            "  {} {} {} {}",
            marker,
            style(&step.label).bold(),
            dim.apply_to(format!("#{}", step.order)),
            dim.apply_to(format!("[{}]", step.shell))
        );
        println!("    {}", dim.apply_to(&step.command));
        if let Some(log) = &step.log {
            for line in log.lines() {
                println!("    {line}");
            }
        }
    }
    println!();
    Ok(())
}
