//! Config command - prints the effective configuration.

use anyhow::Result;
use clap::Args;
use cmdq_config::{CmdqConfig, LoggingConfig, StoreConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show only the resolved file paths
    #[arg(long)]
    pub paths: bool,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    if args.paths {
        println!("config dir: {}", display_opt(ctx.config_dir.as_deref()));
        println!("database:   {}", config.database_path().display());
        println!("logs:       {}", ctx.log_dir().display());
        return Ok(());
    }

    // Every section filled in, defaults included
    let effective = CmdqConfig {
        store: Some(StoreConfig {
            path: Some(config.database_path()),
        }),
        worker: Some(config.worker()),
        system_command: Some(config.system_command()),
        logging: Some(LoggingConfig {
            dir: Some(ctx.log_dir()),
        }),
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        print!("{}", effective.to_toml()?);
    }
    Ok(())
}

fn display_opt(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}
