//! Subprocess execution with cooperative cancellation.
//!
//! Every docker/ssh call goes through here. The cancellation token is checked
//! before spawning; if it fires while the child runs, the child is killed and
//! reaped before `SessionError::Cancelled` is returned.

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, SessionError};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or 1 when the process was terminated by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

/// Human-readable rendering of a command for logs and errors.
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn spawn(cmd: &mut Command, cancel: &CancellationToken) -> Result<Child> {
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }
    cmd.kill_on_drop(true).spawn().map_err(|source| SessionError::SpawnFailed {
        program: cmd.as_std().get_program().to_string_lossy().into_owned(),
        source,
    })
}

/// Wait for `child`, killing and reaping it if `cancel` fires first.
async fn wait_or_kill(child: &mut Child, cancel: &CancellationToken) -> Result<ExitStatus> {
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    match finished {
        Some(status) => status.map_err(|e| SessionError::Other(e.into())),
        None => {
            tracing::debug!("cancellation requested, terminating subprocess");
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill subprocess: {}", e);
            }
            let _ = child.wait().await;
            Err(SessionError::Cancelled)
        }
    }
}

/// Run `cmd` to completion with stdout and stderr captured.
pub async fn capture(mut cmd: Command, cancel: &CancellationToken) -> Result<CommandOutput> {
    tracing::debug!(command = %describe(&cmd), "running");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(&mut cmd, cancel)?;

    // Readers own the pipes so the child stays free for kill/wait
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = wait_or_kill(&mut child, cancel).await?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Run `cmd` attached to this terminal and return its exit code.
pub async fn interactive(mut cmd: Command, cancel: &CancellationToken) -> Result<i32> {
    tracing::debug!(command = %describe(&cmd), "running interactively");
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let mut child = spawn(&mut cmd, cancel)?;
    let status = wait_or_kill(&mut child, cancel).await?;
    match status.code() {
        Some(code) => Ok(code),
        // Killed by a signal; an interrupt that also tripped the token is a cancellation
        None if cancel.is_cancelled() => Err(SessionError::Cancelled),
        None => Ok(1),
    }
}
