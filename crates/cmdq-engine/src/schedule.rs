//! Cron-driven polling loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{EngineError, Result};
use crate::orchestrator::Poller;

/// A parsed five-field cron expression.
pub struct PollSchedule {
    expression: String,
    cron: Cron,
}

impl fmt::Debug for PollSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PollSchedule").field(&self.expression).finish()
    }
}

impl PollSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| EngineError::Schedule(format!("invalid cron '{expression}': {e}")))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.cron
            .find_next_occurrence(&after, false)
            .map_err(|e| EngineError::Schedule(format!("no next occurrence for '{}': {e}", self.expression)))
    }
}

/// Fires [`Poller::tick`] on a schedule until shut down.
pub struct PollLoop {
    poller: Arc<Poller>,
    schedule: PollSchedule,
    run_on_start: bool,
}

impl PollLoop {
    pub fn new(poller: Arc<Poller>, schedule: PollSchedule) -> Self {
        Self {
            poller,
            schedule,
            run_on_start: true,
        }
    }

    /// Whether to tick once immediately before the first occurrence.
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Run until `shutdown` resolves, then wait for in-flight ticks.
    ///
    /// Ticks run as separate tasks so a slow tick does not delay the clock;
    /// the poller's guard skips any tick that would overlap it.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            schedule = %self.schedule.expression(),
            run_on_start = self.run_on_start,
            "Polling loop started"
        );

        let mut ticks = JoinSet::new();
        if self.run_on_start {
            ticks.spawn(tick(self.poller.clone()));
        }

        tokio::pin!(shutdown);
        loop {
            while let Some(joined) = ticks.try_join_next() {
                log_join(joined);
            }

            let now = Utc::now();
            let next = self.schedule.next_after(now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Waiting for next tick");

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {
                    ticks.spawn(tick(self.poller.clone()));
                }
            }
        }

        if !ticks.is_empty() {
            info!("Shutdown requested, waiting for in-flight tick");
        }
        while let Some(joined) = ticks.join_next().await {
            log_join(joined);
        }
        info!("Polling loop stopped");
        Ok(())
    }
}

async fn tick(poller: Arc<Poller>) {
    match poller.tick().await {
        Ok(report) => debug!(?report, "Tick report"),
        Err(e) => error!(error = %e, "Tick failed"),
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Tick task panicked");
    }
}
