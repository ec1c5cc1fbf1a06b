//! Engine configuration.

use std::time::Duration;

use crate::shell::HostPlatform;

/// Default per-step timeout (5 minutes).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default stale lease threshold (10 minutes).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Default per-stream output ceiling (20 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 20 * 1024 * 1024;

/// Settings consumed by the lease manager, command builder and executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timeout for steps without their own `timeout_ms`.
    pub command_timeout: Duration,
    /// Age after which a lease may be taken over by another worker.
    pub lock_timeout: Duration,
    /// Output ceiling per stream; exceeding it fails the step.
    pub max_output_bytes: usize,
    /// Privilege wrapper template for `run_as_system` steps.
    pub system_wrapper: Option<String>,
    /// Fail `run_as_system` steps when no wrapper is configured.
    pub system_strict: bool,
    /// Platform used to pick shell invocation templates.
    pub platform: HostPlatform,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            system_wrapper: None,
            system_strict: false,
            platform: HostPlatform::detect(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the stale lease threshold.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the output ceiling.
    pub fn with_max_output_bytes(mut self, size: usize) -> Self {
        self.max_output_bytes = size;
        self
    }

    /// Set the privilege wrapper; blank templates count as unset.
    pub fn with_system_wrapper(mut self, wrapper: Option<String>) -> Self {
        self.system_wrapper = wrapper.filter(|w| !w.trim().is_empty());
        self
    }

    /// Set strict mode for missing wrappers.
    pub fn with_system_strict(mut self, strict: bool) -> Self {
        self.system_strict = strict;
        self
    }

    /// Override the detected host platform.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }
}
