//! Command-run persistence for cmdq.
//!
//! A command run is a working directory plus an ordered list of shell steps.
//! Runs are shared by every worker process through one store, so all engine
//! mutations go through conditional, field-scoped updates exposed by
//! [`RunStorage`]: lease acquisition, per-step result writes and terminal
//! writes that release the lease in the same statement.

pub mod error;
pub mod storage;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use storage::{MockRunStorage, RunStorage, StepFailure};
pub use store::SqliteRunStore;
pub use types::{CommandRun, NewCommandRun, NewStep, RunFilter, RunStatus, Step, StepShell};
