//! Polling orchestrator.
//!
//! One [`Poller::tick`] drains the eligible runs: lease each in `add_date`
//! order and drive it through the [`StepRunner`]. Ticks in one process never
//! overlap; a tick that starts while another is running is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cmdq_store::RunStorage;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::lease::LeaseManager;
use crate::runner::{RunOutcome, StepRunner};

/// Counts from one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Another tick was running; nothing was done.
    pub skipped: bool,
    /// Eligible runs seen at the start of the tick.
    pub candidates: usize,
    /// Runs whose lease this tick won.
    pub leased: usize,
    pub completed: usize,
    pub failed: usize,
    /// Runs terminalized after a processing error.
    pub aborted: usize,
}

/// Resets the busy flag when dropped, on every exit path.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight driver for polling ticks.
pub struct Poller {
    lease: LeaseManager,
    runner: StepRunner,
    busy: AtomicBool,
}

impl Poller {
    pub fn new(store: Arc<dyn RunStorage>, config: &EngineConfig) -> Self {
        Self {
            lease: LeaseManager::new(store.clone(), config.lock_timeout),
            runner: StepRunner::new(store, config),
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a tick is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one polling pass.
    ///
    /// Only a failure to list candidates is returned as an error; failures
    /// within a run are recorded on that run and the tick moves on.
    pub async fn tick(&self) -> Result<TickReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Command-run queue is already running, skipping this tick");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        }
        let _guard = TickGuard(&self.busy);

        let candidates = self.lease.pending()?;
        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };

        for candidate in candidates {
            match self.lease.acquire(&candidate.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(run_id = %candidate.id, error = %e, "Lease acquisition failed");
                    continue;
                }
            }
            report.leased += 1;

            match self.process(&candidate.id).await {
                Ok(outcome) if outcome.is_success() => report.completed += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    report.aborted += 1;
                    error!(run_id = %candidate.id, error = %e, "Run processing failed");
                    if let Err(release_err) =
                        self.lease.release_with_error(&candidate.id, &e.to_string())
                    {
                        error!(
                            run_id = %candidate.id,
                            error = %release_err,
                            "Could not release lease; it will expire"
                        );
                    }
                }
            }
        }

        if report.leased > 0 {
            info!(
                candidates = report.candidates,
                leased = report.leased,
                completed = report.completed,
                failed = report.failed,
                aborted = report.aborted,
                "Tick finished"
            );
        }
        Ok(report)
    }

    async fn process(&self, id: &str) -> Result<RunOutcome> {
        let run = self.lease.load(id)?;
        let outcome = self.runner.process(&run).await?;
        info!(run_id = %id, outcome = ?outcome, "Run processed");
        Ok(outcome)
    }
}
