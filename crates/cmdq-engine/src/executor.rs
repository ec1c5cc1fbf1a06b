//! Step execution.
//!
//! Runs a built command line through the host shell in the run's directory,
//! bounded by a timeout and a per-stream output ceiling. Every failure mode
//! (non-zero exit, timeout, oversized output, spawn failure) is returned as a
//! failed [`ExecutionResult`]; nothing here returns an error.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Placeholder output for a successful command that printed nothing.
pub const SUCCESS_PLACEHOLDER: &str = "Command completed successfully.";

/// Placeholder output for a failed command that printed nothing.
pub const FAILURE_PLACEHOLDER: &str = "Command execution failed.";

/// Outcome of running one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Stdout, stderr and any failure message, trimmed.
    pub output: String,
    /// The exact command line that was run.
    pub executed_command: String,
}

impl ExecutionResult {
    fn new(success: bool, executed_command: &str, output: String) -> Self {
        let output = if output.is_empty() {
            if success {
                SUCCESS_PLACEHOLDER.to_string()
            } else {
                FAILURE_PLACEHOLDER.to_string()
            }
        } else {
            output
        };
        Self {
            success,
            output,
            executed_command: executed_command.to_string(),
        }
    }

    /// The audit log stored on the step: the command line, then its output.
    pub fn log_entry(&self) -> String {
        format!("$ {}\n\n{}", self.executed_command, self.output)
    }
}

/// Why output collection stopped before both streams reached EOF.
enum Interrupt {
    Overflow,
    Io(std::io::Error),
}

/// Spawns command lines and collects their output.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    max_output_bytes: usize,
}

impl StepExecutor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run `command_line` in `directory`, killing it after `timeout_duration`.
    pub async fn run(
        &self,
        command_line: &str,
        directory: &Path,
        timeout_duration: Duration,
    ) -> ExecutionResult {
        let mut cmd = host_command(command_line);
        cmd.current_dir(directory);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(directory = %directory.display(), error = %e, "Failed to spawn command");
                return ExecutionResult::new(
                    false,
                    command_line,
                    format!("Failed to spawn command: {e}"),
                );
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let waited = timeout(timeout_duration, async {
            // Either stream overflowing stops collection at once.
            tokio::try_join!(
                read_capped(stdout, &mut stdout_buf, limit),
                read_capped(stderr, &mut stderr_buf, limit)
            )?;
            child.wait().await.map_err(Interrupt::Io)
        })
        .await;

        let failure = match waited {
            Ok(Ok(status)) if status.success() => None,
            Ok(Ok(status)) => Some(exit_failure(status)),
            Ok(Err(Interrupt::Overflow)) => {
                kill(&mut child).await;
                Some(format!("Output exceeded {limit} bytes"))
            }
            Ok(Err(Interrupt::Io(e))) => {
                kill(&mut child).await;
                Some(format!("Failed to collect command output: {e}"))
            }
            Err(_) => {
                kill(&mut child).await;
                Some(format!(
                    "Command timed out after {} ms",
                    timeout_duration.as_millis()
                ))
            }
        };

        let output = combine_output(&stdout_buf, &stderr_buf, failure.as_deref());
        debug!(
            success = failure.is_none(),
            stdout_bytes = stdout_buf.len(),
            stderr_bytes = stderr_buf.len(),
            "Command finished"
        );
        ExecutionResult::new(failure.is_none(), command_line, output)
    }
}

fn exit_failure(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Command failed with exit code {code}"),
        None => "Command terminated by signal".to_string(),
    }
}

#[cfg(unix)]
fn host_command(command_line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command_line);
    // Own process group, so a kill reaches every process the step started.
    cmd.process_group(0);
    cmd
}

#[cfg(windows)]
fn host_command(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.args(["/d", "/s", "/c"]);
    cmd.raw_arg(format!("\"{command_line}\""));
    cmd
}

/// Kill the command and everything it started, then reap it.
async fn kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_tree(pid).await;
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill command");
    }
}

#[cfg(unix)]
async fn kill_tree(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) only sends a signal; the group is the one created at spawn.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Failed to kill process group"
        );
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        debug!(pid, error = %e, "Failed to kill process tree");
    }
}

/// Read `reader` to EOF into `buf`, keeping at most `limit` bytes.
///
/// Fails with [`Interrupt::Overflow`] once the stream exceeds `limit`.
async fn read_capped<R>(
    reader: Option<R>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<(), Interrupt>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await.map_err(Interrupt::Io)?;
        if n == 0 {
            return Ok(());
        }
        let room = limit.saturating_sub(buf.len());
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            return Err(Interrupt::Overflow);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8], failure: Option<&str>) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    [stdout.as_ref(), stderr.as_ref(), failure.unwrap_or("")]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
