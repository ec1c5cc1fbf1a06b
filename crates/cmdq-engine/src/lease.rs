//! Lease management.
//!
//! A lease is the `processing`/`processing_started_at` pair on a run. It is
//! taken with one conditional store update and released by whichever
//! terminal write finishes the run. Leases older than the lock timeout are
//! treated as abandoned and may be taken over.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cmdq_store::{CommandRun, RunStorage};
use tracing::{debug, warn};

use crate::error::Result;

/// Acquires and force-releases run leases.
pub struct LeaseManager {
    store: Arc<dyn RunStorage>,
    stale_after: TimeDelta,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn RunStorage>, lock_timeout: Duration) -> Self {
        Self {
            store,
            stale_after: TimeDelta::from_std(lock_timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Leases started before this instant are stale.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Runs that may be leased now, oldest first.
    pub fn pending(&self) -> Result<Vec<CommandRun>> {
        Ok(self.store.find_pending(self.stale_before(Utc::now()))?)
    }

    /// Try to take the lease on `id`. Returns whether this caller owns it.
    pub fn acquire(&self, id: &str) -> Result<bool> {
        let now = Utc::now();
        let acquired = self
            .store
            .try_acquire_lease(id, now, self.stale_before(now))?;
        debug!(run_id = %id, acquired, "Lease attempt");
        Ok(acquired)
    }

    /// Reload a leased run so processing sees the latest step state.
    pub fn load(&self, id: &str) -> Result<CommandRun> {
        Ok(self.store.get_run(id)?)
    }

    /// Terminalize a run as failed with `message` and release its lease.
    pub fn release_with_error(&self, id: &str, message: &str) -> Result<()> {
        warn!(run_id = %id, error = %message, "Releasing lease after processing error");
        self.store.abort_run(id, message, Utc::now())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdq_store::{MockRunStorage, NewCommandRun, NewStep, SqliteRunStore};

    fn insert(store: &dyn RunStorage) -> CommandRun {
        store
            .insert_run(NewCommandRun::new("/tmp").with_step(NewStep::new("a", "true", 1)))
            .unwrap()
    }

    #[test]
    fn test_stale_before() {
        let store = Arc::new(MockRunStorage::new());
        let lease = LeaseManager::new(store, Duration::from_secs(600));
        let now = Utc::now();
        assert_eq!(lease.stale_before(now), now - TimeDelta::minutes(10));

        let unbounded = LeaseManager::new(Arc::new(MockRunStorage::new()), Duration::MAX);
        assert_eq!(unbounded.stale_before(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_acquire_once() {
        let store = Arc::new(SqliteRunStore::open_in_memory().unwrap());
        let run = insert(store.as_ref());
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(600));

        assert_eq!(lease.pending().unwrap().len(), 1);
        assert!(lease.acquire(&run.id).unwrap());
        assert!(!lease.acquire(&run.id).unwrap());
        assert!(lease.pending().unwrap().is_empty());
    }

    #[test]
    fn test_stale_lease_takeover() {
        let store = Arc::new(MockRunStorage::new());
        let mut run = NewCommandRun::new("/tmp")
            .with_step(NewStep::new("a", "true", 1))
            .into_run(Utc::now())
            .unwrap();
        run.processing = true;
        run.processing_started_at = Some(Utc::now() - TimeDelta::minutes(11));
        let id = run.id.clone();
        store.insert_raw(run);

        let lease = LeaseManager::new(store.clone(), Duration::from_secs(600));
        assert_eq!(lease.pending().unwrap().len(), 1);
        assert!(lease.acquire(&id).unwrap());

        let taken = store.get_run(&id).unwrap();
        assert!(taken.processing);
        assert!(taken.processing_started_at.unwrap() > Utc::now() - TimeDelta::minutes(1));
    }

    #[test]
    fn test_release_with_error() {
        let store = Arc::new(MockRunStorage::new());
        let run = insert(store.as_ref());
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(600));
        assert!(lease.acquire(&run.id).unwrap());

        lease.release_with_error(&run.id, "disk on fire").unwrap();
        let stored = store.get_run(&run.id).unwrap();
        assert!(stored.completed && stored.error && !stored.processing);
        assert_eq!(stored.error_message.as_deref(), Some("disk on fire"));
        assert!(!stored.steps[0].completed);
        assert!(!lease.acquire(&run.id).unwrap());
    }
}
