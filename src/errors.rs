//! Typed error hierarchy for session provisioning.
//!
//! Two enums cover the taxonomy:
//! - `ValidationError`: bad option combinations and malformed names, raised before any I/O
//! - `SessionError`: everything that can fail once resolution starts, with an exit code mapping

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a generic failure or a run/exec ownership conflict.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for an ownership conflict hit while `shell --reset` was requested.
pub const EXIT_RESET_CONFLICT: i32 = 15;

/// Option and name validation failures. Never retried.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("--container cannot be combined with --workspace")]
    ContainerWithWorkspace,

    #[error("--container cannot be combined with --data-volume")]
    ContainerWithDataVolume,

    #[error("--reset cannot be combined with --fresh (reset already recreates the container)")]
    ResetWithFresh,

    #[error("--reset cannot be combined with --container")]
    ResetWithContainer,

    #[error("--reset cannot be combined with --data-volume")]
    ResetWithDataVolume,

    #[error("exec requires a command, e.g. `cai exec -- ls -la`")]
    ExecWithoutCommand,

    #[error("invalid data volume name '{name}' from {source_name}: must start with a letter or digit, contain only [A-Za-z0-9._-], and be at most 255 characters")]
    InvalidVolumeName { name: String, source_name: String },

    #[error("invalid container name '{0}': must start with a letter or digit and contain only [A-Za-z0-9_.-]")]
    InvalidContainerName(String),

    #[error("invalid environment override '{0}': expected KEY=VALUE with KEY matching [A-Za-z_][A-Za-z0-9_]*")]
    InvalidEnvOverride(String),

    #[error("--credentials host mounts host credentials into the sandbox; pass --acknowledge-credential-risk to confirm")]
    CredentialRiskNotAcknowledged,

    #[error("--cpus must be a finite number greater than zero (got {0})")]
    InvalidCpus(f64),

    #[error("workspace {} does not exist or is not a directory", .0.display())]
    WorkspaceNotFound(PathBuf),

    #[error("config file {} does not exist", .0.display())]
    ConfigNotFound(PathBuf),
}

/// Errors raised while resolving, provisioning, or bridging to a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A container exists under the target name but this workspace does not own it.
    #[error("container '{container}' {detail}; refusing to touch it (use --fresh to recreate a container you own, or pick another --container)")]
    OwnershipConflict {
        container: String,
        detail: String,
        exit_code: i32,
    },

    /// An existing container has no usable `containai.ssh-port` label, so its published port is unknown.
    #[error("container '{0}' has no SSH port label; its published port is unknown (use --fresh to recreate it)")]
    MissingSshPort(String),

    #[error("too many container name collisions for '{base}' (tried {attempts} names)")]
    NameCollisionLimit { base: String, attempts: u32 },

    #[error("no isolation context available — rerun with --force or run setup")]
    NoIsolationContext,

    #[error("runtime context '{0}' from CONTAINAI_CONTEXT does not exist")]
    UnknownContext(String),

    #[error("sshd in container '{container}' did not become ready on port {port} after {attempts} attempts")]
    StartupTimeout {
        container: String,
        port: u16,
        attempts: u32,
    },

    #[error("`{command}` failed with exit code {code}: {stderr}")]
    Runtime {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("detached run did not report a PID (got '{0}')")]
    InvalidRemotePid(String),

    /// Cooperative cancellation. Maps to a clean exit.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SessionError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Cancelled => 0,
            SessionError::OwnershipConflict { exit_code, .. } => *exit_code,
            _ => EXIT_FAILURE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
