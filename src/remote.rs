//! The SSH bridge into a running session container.

use std::path::PathBuf;

use anyhow::Context;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::environment::ResolutionContext;
use crate::errors::{Result, SessionError};
use crate::lifecycle::{EnsuredSession, WORKSPACE_MOUNT};
use crate::options::{SessionCommandOptions, SessionMode};
use crate::process;

pub const REMOTE_USER: &str = "agent";
pub const DEFAULT_AGENT: &str = "claude";

/// How the remote side finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The SSH client's exit status, passed through verbatim.
    Exited(i32),
    /// A detached run; the PID of the background process in the container.
    Detached { pid: u32 },
}

impl RemoteOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RemoteOutcome::Exited(code) => *code,
            RemoteOutcome::Detached { .. } => 0,
        }
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Quote every argument and join them, keeping argument boundaries intact.
pub fn quote_words(words: &[String]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The command string handed to the remote login shell.
pub fn remote_command(options: &SessionCommandOptions, env: &[(String, String)]) -> String {
    let mut script: String = env
        .iter()
        .map(|(key, value)| format!("export {}={}; ", key, shell_quote(value)))
        .collect();
    script.push_str(&format!("cd {} && ", shell_quote(WORKSPACE_MOUNT)));

    let user_command = quote_words(&options.command);
    match options.mode {
        SessionMode::Shell => script.push_str("exec $SHELL -l"),
        SessionMode::Exec => {
            script.push_str(&format!("bash -lc {}", shell_quote(&user_command)));
        }
        SessionMode::Run => {
            let program = if options.command.is_empty() {
                shell_quote(options.agent.as_deref().unwrap_or(DEFAULT_AGENT))
            } else {
                user_command
            };
            if options.detached {
                script.push_str(&format!(
                    "{{ nohup {} </dev/null >/dev/null 2>&1 & echo $!; }}",
                    program
                ));
            } else {
                script.push_str(&program);
            }
        }
    }
    script
}

pub struct RemoteExecutor {
    ssh_bin: String,
    identity_file: PathBuf,
    known_hosts_file: PathBuf,
    stdin_is_tty: bool,
    cancel: CancellationToken,
}

impl RemoteExecutor {
    pub fn new(env: &ResolutionContext, cancel: CancellationToken) -> Self {
        Self {
            ssh_bin: env.ssh_bin.clone(),
            identity_file: env.ssh_identity_file(),
            known_hosts_file: env.known_hosts_file(),
            stdin_is_tty: env.stdin_is_tty,
            cancel,
        }
    }

    fn wants_tty(&self, options: &SessionCommandOptions) -> bool {
        match options.mode {
            SessionMode::Shell => true,
            SessionMode::Run => !options.detached && self.stdin_is_tty,
            SessionMode::Exec => false,
        }
    }

    /// Full argv (without the program) for one session.
    pub fn ssh_args(&self, options: &SessionCommandOptions, port: u16, remote: &str) -> Vec<String> {
        let mut args = Vec::new();
        if self.wants_tty(options) {
            args.push("-tt".to_string());
        }
        if options.debug {
            args.push("-v".to_string());
        } else if options.quiet {
            args.push("-q".to_string());
        }
        args.extend([
            "-p".to_string(),
            port.to_string(),
            "-i".to_string(),
            self.identity_file.to_string_lossy().into_owned(),
        ]);
        for opt in [
            "IdentitiesOnly=yes".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            format!("UserKnownHostsFile={}", self.known_hosts_file.display()),
            "PreferredAuthentications=publickey".to_string(),
            "PasswordAuthentication=no".to_string(),
            "AddressFamily=inet".to_string(),
            "ConnectTimeout=10".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(opt);
        }
        args.push(format!("{}@127.0.0.1", REMOTE_USER));
        args.push(remote.to_string());
        args
    }

    pub async fn execute(
        &self,
        options: &SessionCommandOptions,
        session: &EnsuredSession,
    ) -> Result<RemoteOutcome> {
        if let Some(dir) = self.known_hosts_file.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let env = options.env_overrides()?;
        let remote = remote_command(options, &env);
        let mut cmd = Command::new(&self.ssh_bin);
        cmd.args(self.ssh_args(options, session.ssh_port, &remote));
        tracing::debug!(container = %session.container_name, mode = %options.mode, "opening SSH session");

        if options.mode == SessionMode::Run && options.detached {
            let description = process::describe(&cmd);
            let output = process::capture(cmd, &self.cancel).await?;
            if !output.success() {
                return Err(SessionError::Runtime {
                    command: description,
                    code: output.code(),
                    stderr: output.stderr.trim().to_string(),
                });
            }
            let pid = parse_pid(&output.stdout)?;
            return Ok(RemoteOutcome::Detached { pid });
        }

        Ok(RemoteOutcome::Exited(
            process::interactive(cmd, &self.cancel).await?,
        ))
    }
}

/// The last non-empty line of a detached run's stdout must be a PID.
fn parse_pid(stdout: &str) -> Result<u32> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or_default();
    line.parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| SessionError::InvalidRemotePid(line.to_string()))
}
