//! `CMDQ_*` environment overrides.
//!
//! - `CMDQ_DB_PATH` - SQLite database file
//! - `CMDQ_POLL_CRON` - polling cron expression
//! - `CMDQ_LOCK_TIMEOUT_MINUTES` - stale lease threshold
//! - `CMDQ_COMMAND_TIMEOUT_MS` - default step timeout
//! - `CMDQ_MAX_OUTPUT_BYTES` - per-stream output ceiling
//! - `CMDQ_SYSTEM_COMMAND_WRAPPER` - privilege wrapper template
//! - `CMDQ_SYSTEM_COMMAND_STRICT` - fail when no wrapper is configured
//! - `CMDQ_LOG_DIR` - log file directory
//!
//! Empty values are treated as unset.

use std::path::PathBuf;
use std::str::FromStr;

use crate::{CmdqConfig, ConfigError, LoggingConfig, Result, StoreConfig};

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` resolves a variable name to its value; the loader passes
/// `std::env::var`, tests pass a map.
pub fn apply_env_overrides<F>(config: &mut CmdqConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = get("CMDQ_DB_PATH") {
        config.store.get_or_insert_with(StoreConfig::default).path = Some(PathBuf::from(path));
    }
    if let Some(dir) = get("CMDQ_LOG_DIR") {
        config.logging.get_or_insert_with(LoggingConfig::default).dir = Some(PathBuf::from(dir));
    }

    let mut worker = config.worker();
    let mut worker_changed = false;
    if let Some(cron) = get("CMDQ_POLL_CRON") {
        worker.poll_cron = cron;
        worker_changed = true;
    }
    if let Some(value) = get("CMDQ_LOCK_TIMEOUT_MINUTES") {
        worker.lock_timeout_minutes = parse_number("CMDQ_LOCK_TIMEOUT_MINUTES", &value)?;
        worker_changed = true;
    }
    if let Some(value) = get("CMDQ_COMMAND_TIMEOUT_MS") {
        worker.command_timeout_ms = parse_number("CMDQ_COMMAND_TIMEOUT_MS", &value)?;
        worker_changed = true;
    }
    if let Some(value) = get("CMDQ_MAX_OUTPUT_BYTES") {
        worker.max_output_bytes = parse_number("CMDQ_MAX_OUTPUT_BYTES", &value)?;
        worker_changed = true;
    }
    if worker_changed {
        config.worker = Some(worker);
    }

    let mut system = config.system_command();
    let mut system_changed = false;
    if let Some(wrapper) = get("CMDQ_SYSTEM_COMMAND_WRAPPER") {
        system.wrapper = Some(wrapper);
        system_changed = true;
    }
    if let Some(value) = get("CMDQ_SYSTEM_COMMAND_STRICT") {
        system.strict = parse_bool(&value);
        system_changed = true;
    }
    if system_changed {
        config.system_command = Some(system);
    }

    Ok(())
}

/// `1`, `true`, `yes` and `on` (any case) are true; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: FromStr>(var: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_env_leaves_config_untouched() {
        let mut config = CmdqConfig::new();
        apply_env_overrides(&mut config, env(&[])).unwrap();
        assert!(config.worker.is_none());
        assert!(config.system_command.is_none());
        assert!(config.store.is_none());
    }

    #[test]
    fn test_env_overrides_worker_and_wrapper() {
        let mut config = CmdqConfig::from_toml("[worker]\ncommand_timeout_ms = 10\n").unwrap();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CMDQ_LOCK_TIMEOUT_MINUTES", "15"),
                ("CMDQ_POLL_CRON", "*/2 * * * *"),
                ("CMDQ_SYSTEM_COMMAND_WRAPPER", "sudo -n {command}"),
                ("CMDQ_SYSTEM_COMMAND_STRICT", "YES"),
                ("CMDQ_DB_PATH", "/tmp/q.db"),
            ]),
        )
        .unwrap();

        let worker = config.worker();
        assert_eq!(worker.lock_timeout_minutes, 15);
        assert_eq!(worker.poll_cron, "*/2 * * * *");
        assert_eq!(worker.command_timeout_ms, 10);
        assert_eq!(config.system_command().wrapper(), Some("sudo -n {command}"));
        assert!(config.system_command().strict);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/q.db"));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let mut config = CmdqConfig::new();
        let err = apply_env_overrides(&mut config, env(&[("CMDQ_COMMAND_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "CMDQ_COMMAND_TIMEOUT_MS"));
    }

    #[test]
    fn test_empty_value_is_unset() {
        let mut config = CmdqConfig::new();
        apply_env_overrides(&mut config, env(&[("CMDQ_COMMAND_TIMEOUT_MS", "")])).unwrap();
        assert!(config.worker.is_none());
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(parse_bool(truthy), "{truthy}");
        }
        for falsy in ["0", "false", "no", "off", "maybe"] {
            assert!(!parse_bool(falsy), "{falsy}");
        }
    }
}
