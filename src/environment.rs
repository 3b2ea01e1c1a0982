//! Process environment captured once per invocation.
//!
//! Nothing below the entry point reads `std::env` directly; it gets a
//! `ResolutionContext` instead, which keeps resolution deterministic in tests.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const ENV_DATA_VOLUME: &str = "CONTAINAI_DATA_VOLUME";
pub const ENV_CONTEXT: &str = "CONTAINAI_CONTEXT";
pub const ENV_CONFIG_DIR: &str = "CONTAINAI_CONFIG_DIR";
pub const ENV_DOCKER: &str = "CONTAINAI_DOCKER";
pub const ENV_SSH: &str = "CONTAINAI_SSH";

/// Bounded retry loop parameters: attempt count and the fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Port lock acquisition: 100 tries, 100ms apart.
    pub const PORT_LOCK: RetryPolicy = RetryPolicy {
        max_attempts: 100,
        delay: Duration::from_millis(100),
    };

    /// sshd readiness after start.
    pub const SSH_READY: RetryPolicy = RetryPolicy {
        max_attempts: 60,
        delay: Duration::from_millis(500),
    };

    /// No delay between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Inclusive SSH port range scanned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const DEFAULT: PortRange = PortRange {
        start: 2300,
        end: 2500,
    };

    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            anyhow::bail!("invalid SSH port range {}-{}", start, end);
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Immutable snapshot of everything the pipeline would otherwise read from the process.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    /// `CONTAINAI_DATA_VOLUME`, if set and non-empty.
    pub data_volume_override: Option<String>,
    /// `CONTAINAI_CONTEXT`, if set and non-empty.
    pub context_override: Option<String>,
    /// Root of user config, state, ports, and SSH material.
    pub config_dir: PathBuf,
    /// Directory the command was invoked from.
    pub cwd: PathBuf,
    pub docker_bin: String,
    pub ssh_bin: String,
    pub stdin_is_tty: bool,
    pub lock_policy: RetryPolicy,
    pub ready_policy: RetryPolicy,
}

impl ResolutionContext {
    /// Capture the real process environment.
    pub fn from_process() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let config_dir = match non_empty_var(ENV_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
                .context("Failed to determine config directory")?
                .join("containai"),
        };

        Ok(Self {
            data_volume_override: non_empty_var(ENV_DATA_VOLUME),
            context_override: non_empty_var(ENV_CONTEXT),
            config_dir,
            cwd,
            docker_bin: non_empty_var(ENV_DOCKER).unwrap_or_else(|| "docker".to_string()),
            ssh_bin: non_empty_var(ENV_SSH).unwrap_or_else(|| "ssh".to_string()),
            stdin_is_tty: std::io::stdin().is_terminal(),
            lock_policy: RetryPolicy::PORT_LOCK,
            ready_policy: RetryPolicy::SSH_READY,
        })
    }

    /// A context rooted at `config_dir` with no overrides and zero-delay retries.
    pub fn isolated(config_dir: &Path, cwd: &Path) -> Self {
        Self {
            data_volume_override: None,
            context_override: None,
            config_dir: config_dir.to_path_buf(),
            cwd: cwd.to_path_buf(),
            docker_bin: "docker".to_string(),
            ssh_bin: "ssh".to_string(),
            stdin_is_tty: false,
            lock_policy: RetryPolicy::immediate(3),
            ready_policy: RetryPolicy::immediate(3),
        }
    }

    pub fn user_config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn ports_dir(&self) -> PathBuf {
        self.config_dir.join("ports")
    }

    pub fn port_lock_file(&self) -> PathBuf {
        self.config_dir.join(".ssh-port.lock")
    }

    pub fn ssh_identity_file(&self) -> PathBuf {
        self.config_dir.join("ssh").join("id_containai")
    }

    pub fn known_hosts_file(&self) -> PathBuf {
        self.config_dir.join("ssh").join("known_hosts")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
