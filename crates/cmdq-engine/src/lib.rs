//! Command-run execution engine.
//!
//! Workers share one queue of command runs through a [`RunStorage`]. Each
//! tick of the [`Poller`] leases eligible runs with a single conditional
//! update ([`LeaseManager`]), walks their steps in order ([`StepRunner`]),
//! builds each step's shell invocation ([`CommandBuilder`]) and runs it
//! ([`StepExecutor`]).
//!
//! ```text
//! PollLoop ─► Poller::tick ─► LeaseManager::acquire ─► StepRunner::process
//!                                                        ├─► CommandBuilder::build
//!                                                        └─► StepExecutor::run
//! ```
//!
//! [`RunStorage`]: cmdq_store::RunStorage

pub mod config;
pub mod error;
pub mod executor;
pub mod lease;
pub mod orchestrator;
pub mod runner;
pub mod schedule;
pub mod shell;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use executor::{ExecutionResult, StepExecutor};
pub use lease::LeaseManager;
pub use orchestrator::{Poller, TickReport};
pub use runner::{EMPTY_COMMAND_MESSAGE, FailureKind, NO_STEPS_MESSAGE, RunOutcome, StepRunner};
pub use schedule::{PollLoop, PollSchedule};
pub use shell::{CommandBuilder, HostPlatform, quote_posix, shell_invocation};
