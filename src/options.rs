//! Per-invocation session options and the pre-I/O option validator.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{EXIT_FAILURE, EXIT_RESET_CONFLICT, ValidationError};

static ENV_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Which bridge the invocation opens once the session is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Launch the agent (or a given command) in the workspace.
    #[default]
    Run,
    /// Interactive login shell in the workspace.
    Shell,
    /// Run a single command through a login shell and return its status.
    Exec,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Run => write!(f, "run"),
            SessionMode::Shell => write!(f, "shell"),
            SessionMode::Exec => write!(f, "exec"),
        }
    }
}

/// How host credentials are exposed to the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialMode {
    #[default]
    None,
    Host,
}

impl std::fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialMode::None => write!(f, "none"),
            CredentialMode::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for CredentialMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CredentialMode::None),
            "host" => Ok(CredentialMode::Host),
            _ => anyhow::bail!("Invalid credentials mode '{}'. Valid values: none, host", s),
        }
    }
}

/// Everything the user asked for on one invocation. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct SessionCommandOptions {
    pub mode: SessionMode,
    pub workspace: Option<PathBuf>,
    pub container: Option<String>,
    pub data_volume: Option<String>,
    pub config: Option<PathBuf>,
    pub template: Option<String>,
    pub image_tag: Option<String>,
    pub channel: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    pub credentials: CredentialMode,
    pub acknowledge_credential_risk: bool,
    /// Agent command used by `run` when no trailing command is given.
    pub agent: Option<String>,
    pub fresh: bool,
    /// Shell mode only: discard the data volume association and start over.
    pub reset: bool,
    pub force: bool,
    pub detached: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub command: Vec<String>,
    /// `KEY=VALUE` overrides exported in the remote command.
    pub env: Vec<String>,
}

impl SessionCommandOptions {
    /// Check option combinations. Touches neither the filesystem nor the runtime.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.container.is_some() {
            if self.workspace.is_some() {
                return Err(ValidationError::ContainerWithWorkspace);
            }
            if self.data_volume.is_some() {
                return Err(ValidationError::ContainerWithDataVolume);
            }
        }

        if self.mode == SessionMode::Shell && self.reset {
            if self.fresh {
                return Err(ValidationError::ResetWithFresh);
            }
            if self.container.is_some() {
                return Err(ValidationError::ResetWithContainer);
            }
            if self.data_volume.is_some() {
                return Err(ValidationError::ResetWithDataVolume);
            }
        }

        if self.mode == SessionMode::Exec && self.command.is_empty() {
            return Err(ValidationError::ExecWithoutCommand);
        }

        for entry in &self.env {
            parse_env_override(entry)?;
        }

        if self.credentials == CredentialMode::Host && !self.acknowledge_credential_risk {
            return Err(ValidationError::CredentialRiskNotAcknowledged);
        }

        if let Some(cpus) = self.cpus
            && (!cpus.is_finite() || cpus <= 0.0)
        {
            return Err(ValidationError::InvalidCpus(cpus));
        }

        Ok(())
    }

    /// Whether `--reset` is in effect. Only shell mode honors it.
    pub fn is_reset(&self) -> bool {
        self.mode == SessionMode::Shell && self.reset
    }

    /// Exit code used when the target container belongs to someone else.
    pub fn conflict_exit_code(&self) -> i32 {
        if self.is_reset() {
            EXIT_RESET_CONFLICT
        } else {
            EXIT_FAILURE
        }
    }

    /// Parsed `-e KEY=VALUE` overrides in the order given.
    pub fn env_overrides(&self) -> Result<Vec<(String, String)>, ValidationError> {
        self.env.iter().map(|e| parse_env_override(e)).collect()
    }
}

fn parse_env_override(entry: &str) -> Result<(String, String), ValidationError> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| ValidationError::InvalidEnvOverride(entry.to_string()))?;
    if !ENV_KEY_REGEX.is_match(key) {
        return Err(ValidationError::InvalidEnvOverride(entry.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}
