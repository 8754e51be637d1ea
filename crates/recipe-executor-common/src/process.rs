// Cancellable subprocess execution, grounded on the teacher's
// `runner-sdk/src/process_invoker.rs`: spawn via `tokio::process::Command`,
// stream stdout/stderr line-by-line, and on cancellation escalate
// SIGINT -> SIGTERM -> SIGKILL (Unix) before giving up and killing outright.
//
// Used by the `run_command` leaf step, which must "respect cancellation at
// its async suspension points" so it can be cancelled cleanly from inside a
// `parallel` or `loop` step.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const SIGINT_TIMEOUT: Duration = Duration::from_millis(2000);
const SIGTERM_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error("failed to start process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process was cancelled")]
    Cancelled,
    #[error("process '{command}' exited with non-zero status {exit_code}")]
    NonZeroExit { command: String, exit_code: i32 },
}

/// Outcome of a completed (non-cancelled) process run.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` (a shell-style command line, split on whitespace) in
/// `working_directory`, streaming stdout/stderr and honoring `cancel` for
/// cooperative cancellation.
pub async fn run_process(
    command: &str,
    working_directory: &str,
    env: &std::collections::HashMap<String, String>,
    require_exit_code_zero: bool,
    cancel: CancellationToken,
) -> Result<ProcessOutcome, RunCommandError> {
    let mut parts = shell_split(command).into_iter();
    let program = parts.next().unwrap_or_default();

    let mut cmd = Command::new(program);
    cmd.args(parts);
    if !working_directory.is_empty() {
        cmd.current_dir(working_directory);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());

    let mut child = cmd.spawn().map_err(|source| RunCommandError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();

    let stdout = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(target: "run_command", "{line}");
                lines.push(line);
            }
        }
        lines
    });

    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(target: "run_command", "{line}");
                lines.push(line);
            }
        }
        lines
    });

    let exit_code;
    let cancelled;

    tokio::select! {
        status = child.wait() => {
            cancelled = false;
            exit_code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
        }
        _ = cancel.cancelled() => {
            cancelled = true;
            exit_code = cancel_and_kill(&mut child).await;
        }
    }

    if let Ok(lines) = stdout_task.await {
        stdout_lines = lines;
    }
    if let Ok(lines) = stderr_task.await {
        stderr_lines = lines;
    }

    if cancelled {
        return Err(RunCommandError::Cancelled);
    }

    if exit_code != 0 && require_exit_code_zero {
        return Err(RunCommandError::NonZeroExit {
            command: command.to_string(),
            exit_code,
        });
    }

    Ok(ProcessOutcome {
        exit_code,
        stdout: stdout_lines.join("\n"),
        stderr: stderr_lines.join("\n"),
    })
}

#[cfg(unix)]
async fn cancel_and_kill(child: &mut tokio::process::Child) -> i32 {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        if kill(pid, Signal::SIGINT).is_ok() && wait_for_exit(child, SIGINT_TIMEOUT).await {
            return child.wait().await.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
        }
        if kill(pid, Signal::SIGTERM).is_ok() && wait_for_exit(child, SIGTERM_TIMEOUT).await {
            return child.wait().await.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
        }
    }
    let _ = child.kill().await;
    child.wait().await.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1)
}

#[cfg(not(unix))]
async fn cancel_and_kill(child: &mut tokio::process::Child) -> i32 {
    let _ = child.kill().await;
    child.wait().await.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1)
}

#[cfg(unix)]
async fn wait_for_exit(child: &mut tokio::process::Child, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, child.wait()).await.is_ok()
}

/// Splits a command line into program + arguments, honoring single/double
/// quotes and backslash escapes (POSIX-shell-adjacent, not a full parser).
fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if !in_single_quote => escape_next = true,
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ' ' | '\t' if !in_single_quote && !in_double_quote => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}
