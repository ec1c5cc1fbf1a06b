//! Configuration system for the cmdq worker.
//!
//! Provides TOML-based configuration with:
//! - Store location (`[store]`)
//! - Polling, lease and command limits (`[worker]`)
//! - Privilege wrapper for `run_as_system` steps (`[system_command]`)
//! - Log file location (`[logging]`)
//!
//! Config file layering (user config dir + project-local `cmdq.toml`) is
//! followed by `CMDQ_*` environment overrides.

pub mod discovery;
pub mod env;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, config_dir, config_path, load_config, load_config_file,
    load_config_with_options,
};
pub use env::apply_env_overrides;
pub use error::{ConfigError, Result};
pub use types::*;
