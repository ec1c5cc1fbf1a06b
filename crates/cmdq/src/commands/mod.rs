//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use cmdq_config::CmdqConfig;
use cmdq_engine::EngineConfig;
use cmdq_store::SqliteRunStore;

pub mod config;
pub mod enqueue;
pub mod list;
pub mod show;
pub mod start;
pub mod tick;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration (files, env and flags applied).
    pub config: CmdqConfig,
    /// User config directory in effect (`--config-dir`, env or platform default).
    pub config_dir: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the shared run store.
    pub fn open_store(&self) -> Result<Arc<SqliteRunStore>> {
        let path = self.config.database_path();
        let store = SqliteRunStore::open(&path)
            .with_context(|| format!("Failed to open run store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.config.log_dir(self.config_dir.as_deref())
    }

    /// Engine settings derived from the `[worker]` and `[system_command]` sections.
    pub fn engine_config(&self) -> EngineConfig {
        let worker = self.config.worker();
        let system = self.config.system_command();
        EngineConfig::new()
            .with_command_timeout(worker.command_timeout())
            .with_lock_timeout(worker.lock_timeout())
            .with_max_output_bytes(worker.max_output_bytes)
            .with_system_wrapper(system.wrapper().map(String::from))
            .with_system_strict(system.strict)
    }
}
