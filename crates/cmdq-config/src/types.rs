//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [store]              # SQLite database location
//! [worker]             # polling schedule, lease and command limits
//! [system_command]     # privilege wrapper for run_as_system steps
//! [logging]            # log file directory
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Application name for platform directory resolution.
pub(crate) const APP_NAME: &str = "cmdq";

/// Default configuration values.
pub mod defaults {
    /// Every minute.
    pub const POLL_CRON: &str = "* * * * *";
    pub const LOCK_TIMEOUT_MINUTES: u64 = 10;
    pub const COMMAND_TIMEOUT_MS: u64 = 300_000;
    /// Per-stream output ceiling (20 MiB).
    pub const MAX_OUTPUT_BYTES: usize = 20 * 1024 * 1024;
    pub const DATABASE_FILE: &str = "cmdq.db";
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdqConfig {
    /// Persistent store settings.
    pub store: Option<StoreConfig>,

    /// Worker polling and execution settings.
    pub worker: Option<WorkerConfig>,

    /// Privilege wrapper settings.
    pub system_command: Option<SystemCommandConfig>,

    /// Log output settings.
    pub logging: Option<LoggingConfig>,
}

impl CmdqConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: CmdqConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.worker.is_some() {
            self.worker = other.worker;
        }
        if other.system_command.is_some() {
            self.system_command = other.system_command;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective worker settings.
    pub fn worker(&self) -> WorkerConfig {
        self.worker.clone().unwrap_or_default()
    }

    /// Effective privilege wrapper settings.
    pub fn system_command(&self) -> SystemCommandConfig {
        self.system_command.clone().unwrap_or_default()
    }

    /// Path to the SQLite database.
    ///
    /// Uses `[store] path` when set, otherwise the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .map(|d| d.join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(defaults::DATABASE_FILE)
            })
    }

    /// Directory for rolling log files.
    ///
    /// Uses `[logging] dir` when set, otherwise `<config_dir>/logs`.
    pub fn log_dir(&self, config_dir: Option<&Path>) -> PathBuf {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.clone())
            .or_else(|| config_dir.map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let worker = self.worker();
        if worker.poll_cron.trim().is_empty() {
            return Err(invalid("worker.poll_cron", "must not be empty"));
        }
        if worker.lock_timeout_minutes == 0 {
            return Err(invalid("worker.lock_timeout_minutes", "must be at least 1"));
        }
        if worker.command_timeout_ms == 0 {
            return Err(invalid("worker.command_timeout_ms", "must be at least 1"));
        }
        if worker.max_output_bytes == 0 {
            return Err(invalid("worker.max_output_bytes", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file shared by every worker process.
    pub path: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Worker polling and execution configuration.
///
/// ```toml
/// [worker]
/// poll_cron = "*/2 * * * *"
/// lock_timeout_minutes = 10
/// command_timeout_ms = 300000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cron expression (5 fields) that triggers a polling pass.
    pub poll_cron: String,
    /// Minutes after which another worker may take over a lease.
    pub lock_timeout_minutes: u64,
    /// Default per-step timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Output ceiling per stream, in bytes.
    pub max_output_bytes: usize,
    /// Run one polling pass immediately at startup.
    pub run_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_cron: defaults::POLL_CRON.to_string(),
            lock_timeout_minutes: defaults::LOCK_TIMEOUT_MINUTES,
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
            max_output_bytes: defaults::MAX_OUTPUT_BYTES,
            run_on_start: true,
        }
    }
}

impl WorkerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_minutes * 60)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System Command Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Privilege wrapper applied to steps with `run_as_system = true`.
///
/// ```toml
/// [system_command]
/// wrapper = "sudo -n -u deploy sh -c {command}"
/// strict = true
/// ```
///
/// A `{command}` placeholder is replaced by the built shell command; without
/// one, the shell command is appended as a single quoted argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemCommandConfig {
    /// Wrapper template.
    pub wrapper: Option<String>,
    /// Fail `run_as_system` steps when no wrapper is configured.
    pub strict: bool,
}

impl SystemCommandConfig {
    /// The wrapper, ignoring blank values.
    pub fn wrapper(&self) -> Option<&str> {
        self.wrapper.as_deref().filter(|w| !w.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily JSON log files.
    pub dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
