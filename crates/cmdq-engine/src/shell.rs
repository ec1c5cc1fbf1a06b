//! Shell command construction.
//!
//! Turns a step's raw command text into one literal command line for the
//! host: the text is quoted for the selected shell, then optionally passed
//! through the configured privilege wrapper.
//!
//! | Selector | Windows host | Other hosts |
//! |----------|--------------|-------------|
//! | default  | `cmd.exe /d /s /c "…"` | `sh -lc '…'` |
//! | bash     | `bash -lc '…'` | `bash -lc '…'` |
//! | cmd      | `cmd.exe /d /s /c "…"` | `sh -lc '…'` |
//! | powershell | `powershell.exe -NoProfile -ExecutionPolicy Bypass -Command "…"` | `pwsh -NoProfile -Command '…'` |

use std::fmt;

use cmdq_store::{Step, StepShell};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Placeholder replaced by the built shell command in a wrapper template.
pub const COMMAND_PLACEHOLDER: &str = "{command}";

/// Host platform family, which decides the invocation templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Unix,
}

impl HostPlatform {
    /// Detect the current platform.
    pub fn detect() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlatform::Windows => f.write_str("windows"),
            HostPlatform::Unix => f.write_str("unix"),
        }
    }
}

/// Quote `value` as a single POSIX shell word.
///
/// Embedded single quotes become `'"'"'` (close, double-quoted quote, reopen).
pub fn quote_posix(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Quote `value` for `cmd.exe`, backslash-escaping embedded double quotes.
pub fn quote_cmd(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

/// Escape backticks and double quotes for a double-quoted PowerShell string.
pub fn escape_powershell(value: &str) -> String {
    value.replace('`', "``").replace('"', "`\"")
}

/// The shell invocation for `command` under `shell` on `platform`.
pub fn shell_invocation(shell: StepShell, platform: HostPlatform, command: &str) -> String {
    match (shell, platform) {
        (StepShell::Posix, _) => format!("bash -lc {}", quote_posix(command)),
        (StepShell::PowerShell, HostPlatform::Windows) => format!(
            "powershell.exe -NoProfile -ExecutionPolicy Bypass -Command \"{}\"",
            escape_powershell(command)
        ),
        (StepShell::PowerShell, HostPlatform::Unix) => {
            format!("pwsh -NoProfile -Command {}", quote_posix(command))
        }
        (StepShell::Native | StepShell::WindowsNative, HostPlatform::Windows) => {
            format!("cmd.exe /d /s /c {}", quote_cmd(command))
        }
        // No cmd.exe off Windows; the native shell stands in.
        (StepShell::Native | StepShell::WindowsNative, HostPlatform::Unix) => {
            format!("sh -lc {}", quote_posix(command))
        }
    }
}

/// Builds final command lines from steps.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    wrapper: Option<String>,
    strict: bool,
    platform: HostPlatform,
}

impl CommandBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            wrapper: config
                .system_wrapper
                .clone()
                .filter(|w| !w.trim().is_empty()),
            strict: config.system_strict,
            platform: config.platform,
        }
    }

    /// Build the command line for `step`.
    ///
    /// Fails with [`EngineError::Configuration`] when the step must run as
    /// system, no wrapper is configured, and strict mode is on.
    pub fn build(&self, step: &Step) -> Result<String> {
        let shell_command = shell_invocation(step.shell, self.platform, &step.command);
        self.apply_wrapper(shell_command, step.run_as_system)
    }

    fn apply_wrapper(&self, shell_command: String, run_as_system: bool) -> Result<String> {
        if !run_as_system {
            return Ok(shell_command);
        }

        let Some(wrapper) = self.wrapper.as_deref() else {
            if self.strict {
                return Err(EngineError::Configuration(
                    "run_as_system is set but no system command wrapper is configured. \
                     Set [system_command] wrapper (or CMDQ_SYSTEM_COMMAND_WRAPPER) or disable strict mode."
                        .to_string(),
                ));
            }
            return Ok(shell_command);
        };

        if wrapper.contains(COMMAND_PLACEHOLDER) {
            Ok(wrapper.replacen(COMMAND_PLACEHOLDER, &shell_command, 1))
        } else {
            Ok(format!("{} {}", wrapper, quote_posix(&shell_command)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(command: &str, shell: StepShell, run_as_system: bool) -> Step {
        Step {
            label: "step".to_string(),
            command: command.to_string(),
            order: 1,
            shell,
            run_as_system,
            timeout_ms: None,
            completed: false,
            completed_at: None,
            error: false,
            log: None,
        }
    }

    fn builder(wrapper: Option<&str>, strict: bool, platform: HostPlatform) -> CommandBuilder {
        CommandBuilder::new(
            &EngineConfig::new()
                .with_system_wrapper(wrapper.map(String::from))
                .with_system_strict(strict)
                .with_platform(platform),
        )
    }

    #[test]
    fn test_quote_posix() {
        assert_eq!(quote_posix("echo hi"), "'echo hi'");
        assert_eq!(quote_posix("it's"), r#"'it'"'"'s'"#);
        assert_eq!(quote_posix(""), "''");
    }

    #[test]
    fn test_quote_cmd_and_powershell() {
        assert_eq!(quote_cmd(r#"echo "x""#), r#""echo \"x\"""#);
        assert_eq!(escape_powershell(r#"Write-Host "a`b""#), r#"Write-Host `"a``b`""#);
    }

    #[test]
    fn test_invocations_unix() {
        let unix = HostPlatform::Unix;
        assert_eq!(shell_invocation(StepShell::Native, unix, "ls"), "sh -lc 'ls'");
        assert_eq!(shell_invocation(StepShell::WindowsNative, unix, "ls"), "sh -lc 'ls'");
        assert_eq!(shell_invocation(StepShell::Posix, unix, "ls"), "bash -lc 'ls'");
        assert_eq!(
            shell_invocation(StepShell::PowerShell, unix, "Get-Date"),
            "pwsh -NoProfile -Command 'Get-Date'"
        );
    }

    #[test]
    fn test_invocations_windows() {
        let win = HostPlatform::Windows;
        assert_eq!(
            shell_invocation(StepShell::Native, win, "dir"),
            r#"cmd.exe /d /s /c "dir""#
        );
        assert_eq!(
            shell_invocation(StepShell::WindowsNative, win, r#"echo "hi""#),
            r#"cmd.exe /d /s /c "echo \"hi\"""#
        );
        assert_eq!(
            shell_invocation(StepShell::Posix, win, "ls"),
            "bash -lc 'ls'"
        );
        assert_eq!(
            shell_invocation(StepShell::PowerShell, win, r#"echo "x""#),
            r#"powershell.exe -NoProfile -ExecutionPolicy Bypass -Command "echo `"x`"""#
        );
    }

    #[test]
    fn test_not_run_as_system_is_verbatim() {
        let b = builder(Some("sudo -n {command}"), true, HostPlatform::Unix);
        let line = b.build(&step("whoami", StepShell::Native, false)).unwrap();
        assert_eq!(line, "sh -lc 'whoami'");
    }

    #[test]
    fn test_wrapper_placeholder() {
        let b = builder(Some("sudo -n -u svc {command}"), false, HostPlatform::Unix);
        let line = b.build(&step("whoami", StepShell::Native, true)).unwrap();
        assert_eq!(line, "sudo -n -u svc sh -lc 'whoami'");
    }

    #[test]
    fn test_wrapper_placeholder_replaced_once() {
        let b = builder(Some("run {command} # {command}"), false, HostPlatform::Unix);
        let line = b.build(&step("id", StepShell::Native, true)).unwrap();
        assert_eq!(line, "run sh -lc 'id' # {command}");
    }

    #[test]
    fn test_wrapper_without_placeholder_quotes_command() {
        let b = builder(Some("sudo -n sh -c"), false, HostPlatform::Unix);
        let line = b.build(&step("echo it's", StepShell::Native, true)).unwrap();
        assert_eq!(
            line,
            format!("sudo -n sh -c {}", quote_posix(r#"sh -lc 'echo it'"'"'s'"#))
        );
    }

    #[test]
    fn test_missing_wrapper_strict_is_configuration_error() {
        let b = builder(None, true, HostPlatform::Unix);
        let err = b.build(&step("id", StepShell::Native, true)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("no system command wrapper"));
    }

    #[test]
    fn test_missing_wrapper_lenient_runs_unwrapped() {
        let b = builder(Some("   "), false, HostPlatform::Unix);
        let line = b.build(&step("id", StepShell::Native, true)).unwrap();
        assert_eq!(line, "sh -lc 'id'");
    }
}
