//! Command-run data model.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Shell selector
// ─────────────────────────────────────────────────────────────────────────────

/// Which shell a step's command is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepShell {
    /// The host's native shell: `cmd.exe` on Windows, `sh` elsewhere.
    #[default]
    #[serde(rename = "default", alias = "native")]
    Native,
    /// A POSIX-compatible shell (`bash`).
    #[serde(rename = "bash", alias = "sh", alias = "posix")]
    Posix,
    /// The Windows command interpreter.
    #[serde(rename = "cmd")]
    WindowsNative,
    /// PowerShell (`powershell.exe` on Windows, `pwsh` elsewhere).
    #[serde(rename = "powershell", alias = "pwsh")]
    PowerShell,
}

impl StepShell {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepShell::Native => "default",
            StepShell::Posix => "bash",
            StepShell::WindowsNative => "cmd",
            StepShell::PowerShell => "powershell",
        }
    }
}

impl fmt::Display for StepShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepShell {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "native" => Ok(StepShell::Native),
            "bash" | "sh" | "posix" => Ok(StepShell::Posix),
            "cmd" => Ok(StepShell::WindowsNative),
            "powershell" | "pwsh" => Ok(StepShell::PowerShell),
            other => Err(StoreError::Invalid(format!("unknown shell '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stored records
// ─────────────────────────────────────────────────────────────────────────────

/// One shell invocation within a run.
///
/// The result fields (`completed`, `completed_at`, `error`, `log`) are written
/// once, when the step finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub label: String,
    pub command: String,
    pub order: i64,
    pub shell: StepShell,
    pub run_as_system: bool,
    /// Overrides the worker's default command timeout.
    pub timeout_ms: Option<u64>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: bool,
    pub log: Option<String>,
}

/// One queued unit of work: a working directory plus ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRun {
    pub id: String,
    pub name: Option<String>,
    pub directory_path: PathBuf,
    pub steps: Vec<Step>,
    pub completed: bool,
    pub error: bool,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
    pub add_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Lease flag; `false` covers both "never leased" and "released".
    pub processing: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
}

/// Coarse lifecycle state, derived from the stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl CommandRun {
    /// Steps in execution order.
    pub fn sorted_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    pub fn status(&self) -> RunStatus {
        match (self.completed, self.error, self.processing) {
            (true, true, _) => RunStatus::Failed,
            (true, false, _) => RunStatus::Completed,
            (false, _, true) => RunStatus::Processing,
            (false, _, false) => RunStatus::Pending,
        }
    }

    /// Whether a worker may lease this run: not completed, and either
    /// unleased or leased before `stale_before`.
    pub fn is_eligible(&self, stale_before: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }
        if !self.processing {
            return true;
        }
        self.processing_started_at
            .is_some_and(|started| started < stale_before)
    }
}

/// Selection for [`crate::RunStorage::list_runs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunFilter {
    #[default]
    All,
    /// Not yet completed, leased or not.
    Pending,
    Failed,
    Completed,
}

impl RunFilter {
    pub fn matches(&self, run: &CommandRun) -> bool {
        match self {
            RunFilter::All => true,
            RunFilter::Pending => !run.completed,
            RunFilter::Failed => run.completed && run.error,
            RunFilter::Completed => run.completed && !run.error,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// A step as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub label: String,
    pub command: String,
    pub order: i64,
    #[serde(default)]
    pub shell: StepShell,
    #[serde(default = "default_true")]
    pub run_as_system: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl NewStep {
    pub fn new(label: impl Into<String>, command: impl Into<String>, order: i64) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            order,
            shell: StepShell::default(),
            run_as_system: true,
            timeout_ms: None,
        }
    }

    pub fn with_shell(mut self, shell: StepShell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_run_as_system(mut self, run_as_system: bool) -> Self {
        self.run_as_system = run_as_system;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    fn into_step(self) -> Step {
        Step {
            label: self.label,
            command: self.command,
            order: self.order,
            shell: self.shell,
            run_as_system: self.run_as_system,
            timeout_ms: self.timeout_ms,
            completed: false,
            completed_at: None,
            error: false,
            log: None,
        }
    }
}

/// A run as submitted by an operator, before it is assigned an id.
///
/// ```toml
/// name = "deploy"
/// directory = "/srv/app"
///
/// [[steps]]
/// label = "pull"
/// command = "git pull --ff-only"
/// order = 1
/// shell = "bash"
/// run_as_system = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommandRun {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "directory_path")]
    pub directory: PathBuf,
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

impl NewCommandRun {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            directory: directory.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_step(mut self, step: NewStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Check the caller-side invariants.
    ///
    /// Step orders must be unique: ties have no defined execution order.
    /// An empty step list is accepted; the engine fails such runs itself.
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(StoreError::Invalid("directory must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.label.trim().is_empty() {
                return Err(StoreError::Invalid(format!(
                    "step with order {} has an empty label",
                    step.order
                )));
            }
            if step.timeout_ms == Some(0) {
                return Err(StoreError::Invalid(format!(
                    "step '{}' has timeout_ms = 0; omit it to use the worker default",
                    step.label
                )));
            }
            if !seen.insert(step.order) {
                return Err(StoreError::Invalid(format!(
                    "duplicate step order {} (step '{}')",
                    step.order, step.label
                )));
            }
        }
        Ok(())
    }

    /// Validate and materialize into a fresh, unleased run.
    pub fn into_run(self, add_date: DateTime<Utc>) -> Result<CommandRun> {
        self.validate()?;
        Ok(CommandRun {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            directory_path: self.directory,
            steps: self.steps.into_iter().map(NewStep::into_step).collect(),
            completed: false,
            error: false,
            failed_step: None,
            error_message: None,
            add_date,
            completed_at: None,
            processing: false,
            processing_started_at: None,
        })
    }
}
