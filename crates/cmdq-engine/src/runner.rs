//! Per-run step state machine.
//!
//! Walks a leased run's steps in `order`, skipping the ones already completed,
//! and persists each step's result before moving on. Every terminal path
//! releases the lease in the same write that finalizes the run, so a crash
//! between steps resumes at the first incomplete step on the next lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cmdq_store::{CommandRun, RunStorage, Step, StepFailure};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::StepExecutor;
use crate::shell::CommandBuilder;

/// Run-level message for a run with no steps.
pub const NO_STEPS_MESSAGE: &str = "No executable steps found.";

/// Step log for a step with a blank command.
pub const EMPTY_COMMAND_MESSAGE: &str = "Step command is empty.";

/// Why a run failed at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker could not build the command (missing wrapper in strict mode).
    Configuration,
    /// The step's command was blank.
    EmptyCommand,
    /// The command ran and failed, timed out, or could not be spawned.
    Execution,
}

/// Terminal outcome of processing one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    NoSteps,
    Failed { step: String, kind: FailureKind },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Drives leased runs through their steps.
pub struct StepRunner {
    store: Arc<dyn RunStorage>,
    builder: CommandBuilder,
    executor: StepExecutor,
    default_timeout: Duration,
}

impl StepRunner {
    pub fn new(store: Arc<dyn RunStorage>, config: &EngineConfig) -> Self {
        Self {
            store,
            builder: CommandBuilder::new(config),
            executor: StepExecutor::new(config.max_output_bytes),
            default_timeout: config.command_timeout,
        }
    }

    /// Process a run whose lease the caller holds.
    ///
    /// Command and validation failures are recorded on the run and reported
    /// in the returned outcome. An `Err` means a store write failed and the
    /// run may still hold its lease.
    pub async fn process(&self, run: &CommandRun) -> Result<RunOutcome> {
        let steps = run.sorted_steps();
        if steps.is_empty() {
            warn!(run_id = %run.id, "Run has no steps");
            self.store.abort_run(&run.id, NO_STEPS_MESSAGE, Utc::now())?;
            return Ok(RunOutcome::NoSteps);
        }

        for step in steps {
            if step.completed {
                debug!(run_id = %run.id, step = %step.label, "Skipping completed step");
                continue;
            }

            if step.command.trim().is_empty() {
                warn!(run_id = %run.id, step = %step.label, "Step command is empty");
                self.fail(run, step, EMPTY_COMMAND_MESSAGE, None)?;
                return Ok(failed(step, FailureKind::EmptyCommand));
            }

            let command_line = match self.builder.build(step) {
                Ok(line) => line,
                Err(EngineError::Configuration(message)) => {
                    warn!(run_id = %run.id, step = %step.label, error = %message, "Cannot build step command");
                    self.fail(run, step, &message, Some(&message))?;
                    return Ok(failed(step, FailureKind::Configuration));
                }
                Err(e) => return Err(e),
            };

            let timeout = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout);
            info!(
                run_id = %run.id,
                step = %step.label,
                order = step.order,
                shell = %step.shell,
                "Executing step"
            );
            let result = self
                .executor
                .run(&command_line, &run.directory_path, timeout)
                .await;
            let log = result.log_entry();

            if !result.success {
                warn!(run_id = %run.id, step = %step.label, "Step failed");
                self.fail(run, step, &log, None)?;
                return Ok(failed(step, FailureKind::Execution));
            }

            let written = self
                .store
                .record_step_success(&run.id, step.order, &log, Utc::now())?;
            if !written {
                warn!(run_id = %run.id, step = %step.label, "Step was already recorded; result discarded");
            }
        }

        self.store.complete_run(&run.id, Utc::now())?;
        info!(run_id = %run.id, "Run completed");
        Ok(RunOutcome::Completed)
    }

    fn fail(
        &self,
        run: &CommandRun,
        step: &Step,
        log: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let failure = StepFailure {
            order: step.order,
            label: &step.label,
            log,
            error_message,
        };
        self.store.fail_run_at_step(&run.id, failure, Utc::now())?;
        Ok(())
    }
}

fn failed(step: &Step, kind: FailureKind) -> RunOutcome {
    RunOutcome::Failed {
        step: step.label.clone(),
        kind,
    }
}
