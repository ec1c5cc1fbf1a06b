//! Error types for the execution engine.

use cmdq_store::StoreError;
use thiserror::Error;

/// Errors raised by the engine.
///
/// Command failures (non-zero exit, timeout, spawn failure) are not errors:
/// they are captured as data in [`crate::ExecutionResult`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker is misconfigured for the step being built, e.g. a
    /// `run_as_system` step in strict mode with no wrapper.
    #[error("{0}")]
    Configuration(String),

    /// The run store rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The polling schedule could not be parsed or evaluated.
    #[error("Schedule error: {0}")]
    Schedule(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
