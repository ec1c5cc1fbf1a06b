//! Start command - runs the polling worker.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cmdq_engine::{PollLoop, PollSchedule, Poller};
use console::Style;
use tracing::info;

use super::Context;

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Wait for the first cron occurrence instead of polling immediately
    #[arg(long)]
    pub no_initial_tick: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let worker = ctx.config.worker();
    let schedule = PollSchedule::parse(&worker.poll_cron)?;

    let store = ctx.open_store()?;
    let engine_config = ctx.engine_config();
    let poller = Arc::new(Poller::new(store, &engine_config));
    let run_on_start = worker.run_on_start && !args.no_initial_tick;

    if !ctx.json_output {
        let dim = Style::new().dim();
        println!(
            "{} polling {} on '{}' (lock timeout {}m, Ctrl-C to stop)",
            Style::new().green().apply_to("●"),
            ctx.config.database_path().display(),
            schedule.expression(),
            worker.lock_timeout_minutes
        );
        if engine_config.system_wrapper.is_none() && engine_config.system_strict {
            println!(
                "  {}",
                dim.apply_to("strict mode: run_as_system steps will fail until a wrapper is set")
            );
        }
    }

    info!(platform = %engine_config.platform, "Worker starting");
    PollLoop::new(poller, schedule)
        .with_run_on_start(run_on_start)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Worker stopped");
    Ok(())
}
