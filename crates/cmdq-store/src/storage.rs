//! Storage abstraction for command runs.
//!
//! # Architecture
//!
//! ```text
//! RunStorage (trait)        - conditional, field-scoped run updates
//!     └── SqliteRunStore    - default SQLite implementation (shared file)
//!     └── MockRunStorage    - in-memory implementation for testing
//! ```
//!
//! Every mutating method is a single atomic update against one run. The
//! engine never reads a run, changes it in memory and writes it back.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{CommandRun, NewCommandRun, RunFilter};
use crate::{Result, StoreError};

/// The terminal write for a run that failed at a specific step.
#[derive(Debug, Clone, Copy)]
pub struct StepFailure<'a> {
    /// `order` of the failing step; addresses the step row.
    pub order: i64,
    /// Label recorded as the run's `failed_step`.
    pub label: &'a str,
    /// Log written to the step.
    pub log: &'a str,
    /// Optional run-level error message.
    pub error_message: Option<&'a str>,
}

/// Capability required by the engine from the shared run store.
pub trait RunStorage: Send + Sync {
    /// Validate and insert a new, unleased run.
    fn insert_run(&self, run: NewCommandRun) -> Result<CommandRun>;

    /// Get a run with all its steps.
    fn get_run(&self, id: &str) -> Result<CommandRun>;

    /// List runs matching `filter`, oldest first.
    fn list_runs(&self, filter: RunFilter) -> Result<Vec<CommandRun>>;

    /// Runs that are not completed and whose lease is absent, released, or
    /// started before `stale_before`; oldest `add_date` first.
    fn find_pending(&self, stale_before: DateTime<Utc>) -> Result<Vec<CommandRun>>;

    /// Atomically take the lease on a run.
    ///
    /// Applies only if the run is not completed and its lease is absent,
    /// released, or started before `stale_before`. Returns whether this
    /// caller now owns the lease.
    fn try_acquire_lease(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark a not-yet-completed step as completed without error.
    ///
    /// Returns `false` if the step was already completed (nothing written).
    fn record_step_success(&self, id: &str, order: i64, log: &str, at: DateTime<Utc>)
    -> Result<bool>;

    /// Mark the step and the run as failed and release the lease.
    fn fail_run_at_step(&self, id: &str, failure: StepFailure<'_>, at: DateTime<Utc>)
    -> Result<()>;

    /// Mark the run completed without error and release the lease.
    fn complete_run(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Mark the run failed with `message` and release the lease, without
    /// touching any step.
    fn abort_run(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<()>;
}

/// In-memory implementation of [`RunStorage`] for testing.
///
/// Step writes can be made to fail to exercise the engine's abort path.
#[derive(Debug, Default)]
pub struct MockRunStorage {
    runs: Mutex<Vec<CommandRun>>,
    fail_step_writes: AtomicBool,
}

impl MockRunStorage {
    /// Create a new empty mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run exactly as given (lease and result fields included).
    pub fn insert_raw(&self, run: CommandRun) {
        self.runs.lock().push(run);
    }

    /// Make subsequent step-success writes return an error.
    pub fn set_fail_step_writes(&self, fail: bool) {
        self.fail_step_writes.store(fail, Ordering::SeqCst);
    }

    fn with_run<T>(&self, id: &str, f: impl FnOnce(&mut CommandRun) -> T) -> Result<T> {
        let mut runs = self.runs.lock();
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(f(run))
    }
}

impl RunStorage for MockRunStorage {
    fn insert_run(&self, run: NewCommandRun) -> Result<CommandRun> {
        let run = run.into_run(Utc::now())?;
        self.runs.lock().push(run.clone());
        Ok(run)
    }

    fn get_run(&self, id: &str) -> Result<CommandRun> {
        self.with_run(id, |r| r.clone())
    }

    fn list_runs(&self, filter: RunFilter) -> Result<Vec<CommandRun>> {
        let mut runs: Vec<CommandRun> = self
            .runs
            .lock()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.add_date);
        Ok(runs)
    }

    fn find_pending(&self, stale_before: DateTime<Utc>) -> Result<Vec<CommandRun>> {
        let mut runs: Vec<CommandRun> = self
            .runs
            .lock()
            .iter()
            .filter(|r| r.is_eligible(stale_before))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.add_date);
        Ok(runs)
    }

    fn try_acquire_lease(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_run(id, |run| {
            if !run.is_eligible(stale_before) {
                return false;
            }
            run.processing = true;
            run.processing_started_at = Some(now);
            true
        })
    }

    fn record_step_success(
        &self,
        id: &str,
        order: i64,
        log: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.fail_step_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "injected step write failure",
            )));
        }
        self.with_run(id, |run| {
            match run.steps.iter_mut().find(|s| s.order == order && !s.completed) {
                Some(step) => {
                    step.completed = true;
                    step.completed_at = Some(at);
                    step.error = false;
                    step.log = Some(log.to_string());
                    true
                }
                None => false,
            }
        })
    }

    fn fail_run_at_step(
        &self,
        id: &str,
        failure: StepFailure<'_>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_run(id, |run| {
            if let Some(step) = run
                .steps
                .iter_mut()
                .find(|s| s.order == failure.order && !s.completed)
            {
                step.completed = true;
                step.completed_at = Some(at);
                step.error = true;
                step.log = Some(failure.log.to_string());
            }
            run.completed = true;
            run.error = true;
            run.failed_step = Some(failure.label.to_string());
            run.error_message = failure.error_message.map(String::from);
            run.completed_at = Some(at);
            run.processing = false;
        })
    }

    fn complete_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_run(id, |run| {
            run.completed = true;
            run.error = false;
            run.failed_step = None;
            run.error_message = None;
            run.completed_at = Some(at);
            run.processing = false;
        })
    }

    fn abort_run(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_run(id, |run| {
            run.completed = true;
            run.error = true;
            run.error_message = Some(message.to_string());
            run.completed_at = Some(at);
            run.processing = false;
        })
    }
}
