//! Container runtime seam.
//!
//! The pipeline only ever talks to a `ContainerRuntime`. `DockerCli` shells out
//! to a docker-compatible binary; tests use an in-memory fake.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::errors::Result;

pub use docker::DockerCli;

pub const LABEL_MANAGED: &str = "containai.managed";
pub const LABEL_TYPE: &str = "containai.type";
pub const LABEL_WORKSPACE: &str = "containai.devcontainer.workspace";
pub const LABEL_DATA_VOLUME: &str = "containai.data-volume";
pub const LABEL_SSH_PORT: &str = "containai.ssh-port";
pub const LABEL_CREATED: &str = "containai.created";

pub const TYPE_DEVCONTAINER: &str = "devcontainer";

/// Snapshot of a container's identifying labels at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLabelState {
    pub exists: bool,
    pub is_owned: bool,
    pub workspace: Option<String>,
    pub data_volume: Option<String>,
    pub ssh_port: Option<u16>,
    /// Runtime state as reported by the engine (`running`, `exited`, `created`, ...).
    pub state: Option<String>,
}

impl ContainerLabelState {
    pub fn missing() -> Self {
        Self::default()
    }

    /// Build a snapshot from raw labels and state.
    pub fn from_labels(labels: &HashMap<String, String>, state: Option<String>) -> Self {
        let non_empty = |key: &str| {
            labels
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            exists: true,
            is_owned: labels.get(LABEL_MANAGED).map(String::as_str) == Some("true"),
            workspace: non_empty(LABEL_WORKSPACE),
            data_volume: non_empty(LABEL_DATA_VOLUME),
            ssh_port: non_empty(LABEL_SSH_PORT)
                .and_then(|p| p.parse().ok())
                .filter(|p| *p != 0),
            state: state.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some("running")
    }

    /// Managed and labelled with exactly this workspace.
    pub fn is_owned_by(&self, workspace: &str) -> bool {
        self.exists && self.is_owned && self.workspace.as_deref() == Some(workspace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

/// A bind or volume mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create a session container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// OCI runtime, e.g. `sysbox-runc`.
    pub runtime: Option<String>,
    /// Host loopback port published to the container's sshd.
    pub ssh_port: u16,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
}

/// Operations the session pipeline needs from a container engine.
///
/// Every call targets an explicit runtime context.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn context_exists(&self, context: &str) -> Result<bool>;

    async fn volume_exists(&self, context: &str, volume: &str) -> Result<bool>;

    async fn create_volume(&self, context: &str, volume: &str) -> Result<()>;

    /// Fresh read of a container's labels and state. A missing container is not an error.
    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState>;

    /// Names of managed containers labelled with `workspace`, sorted.
    async fn find_by_workspace(&self, context: &str, workspace: &str) -> Result<Vec<String>>;

    /// Every `containai.ssh-port` label value under the context.
    async fn ssh_port_labels(&self, context: &str) -> Result<Vec<u16>>;

    async fn create(&self, context: &str, spec: &ContainerSpec) -> Result<()>;

    async fn start(&self, context: &str, name: &str) -> Result<()>;

    async fn stop(&self, context: &str, name: &str) -> Result<()>;

    async fn remove(&self, context: &str, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_labels_owned() {
        let state = ContainerLabelState::from_labels(
            &labels(&[
                (LABEL_MANAGED, "true"),
                (LABEL_WORKSPACE, "/src/app"),
                (LABEL_DATA_VOLUME, "vol"),
                (LABEL_SSH_PORT, "2301"),
            ]),
            Some("running".into()),
        );
        assert!(state.exists);
        assert!(state.is_owned);
        assert!(state.is_running());
        assert_eq!(state.ssh_port, Some(2301));
        assert!(state.is_owned_by("/src/app"));
        assert!(!state.is_owned_by("/src/other"));
    }

    #[test]
    fn test_from_labels_unmanaged() {
        let state = ContainerLabelState::from_labels(
            &labels(&[(LABEL_MANAGED, "yes"), (LABEL_SSH_PORT, "not-a-port")]),
            Some("exited".into()),
        );
        assert!(state.exists);
        assert!(!state.is_owned);
        assert_eq!(state.ssh_port, None);
        assert!(!state.is_running());
        assert!(!state.is_owned_by(""));
    }

    #[test]
    fn test_missing_is_not_owned() {
        let state = ContainerLabelState::missing();
        assert!(!state.exists);
        assert!(!state.is_owned_by("/src/app"));
    }
}
