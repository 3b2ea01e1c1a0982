use std::fmt;
use std::path::Path;

use crate::config::ConfigStore;
use crate::environment::ENV_DATA_VOLUME;
use crate::errors::Result;
use crate::naming::validate_volume_name;

pub const DEFAULT_DATA_VOLUME: &str = "containai-data";

/// Where the selected data volume name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSource {
    Cli,
    Environment,
    PersistedState,
    WorkspaceConfig,
    GlobalConfig,
    Default,
    /// Recorded on the container being attached to.
    ContainerLabel,
    /// Freshly generated by `shell --reset`.
    Reset,
}

impl VolumeSource {
    /// Sources the user named on this invocation.
    pub fn is_explicit(self) -> bool {
        matches!(self, VolumeSource::Cli | VolumeSource::Environment)
    }
}

impl fmt::Display for VolumeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeSource::Cli => "--data-volume",
            VolumeSource::Environment => ENV_DATA_VOLUME,
            VolumeSource::PersistedState => "saved workspace state",
            VolumeSource::WorkspaceConfig => "workspace config",
            VolumeSource::GlobalConfig => "agent.data_volume",
            VolumeSource::Default => "default",
            VolumeSource::ContainerLabel => "container label",
            VolumeSource::Reset => "--reset",
        };
        write!(f, "{}", s)
    }
}

/// Stores consulted after the explicit sources.
pub struct VolumeLookup<'a> {
    pub workspace: &'a Path,
    /// User config holding per-workspace state.
    pub state: &'a dyn ConfigStore,
    /// Discovered config consulted for the workspace's own `data_volume`.
    /// `None` when the discovered file is the user config, which `state` already covers.
    pub workspace_config: Option<&'a dyn ConfigStore>,
    /// Discovered config consulted for `agent.data_volume`.
    pub global_config: Option<&'a dyn ConfigStore>,
}

/// First match wins: CLI, environment, saved state, discovered config, default.
///
/// Invalid names from the CLI, the environment, or a config file are errors. An
/// invalid saved value is skipped so a hand-edited state file cannot wedge a workspace.
pub fn resolve_data_volume(
    explicit: Option<&str>,
    env_override: Option<&str>,
    lookup: &VolumeLookup<'_>,
) -> Result<(String, VolumeSource)> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        validate_volume_name(name, "--data-volume")?;
        return Ok((name.to_string(), VolumeSource::Cli));
    }

    if let Some(name) = env_override.map(str::trim).filter(|n| !n.is_empty()) {
        validate_volume_name(name, ENV_DATA_VOLUME)?;
        return Ok((name.to_string(), VolumeSource::Environment));
    }

    if let Some(value) = lookup.state.get_workspace(lookup.workspace, "data_volume")?
        && let Some(name) = value.as_str()
    {
        match validate_volume_name(name, "saved workspace state") {
            Ok(()) => return Ok((name.to_string(), VolumeSource::PersistedState)),
            Err(e) => tracing::warn!("ignoring saved data volume: {}", e),
        }
    }

    if let Some(config) = lookup.workspace_config
        && let Some(value) = config.get_workspace(lookup.workspace, "data_volume")?
        && let Some(name) = value.as_str()
    {
        validate_volume_name(name, "workspace config")?;
        return Ok((name.to_string(), VolumeSource::WorkspaceConfig));
    }

    if let Some(config) = lookup.global_config
        && let Some(value) = config.get("agent.data_volume")?
        && let Some(name) = value.as_str()
    {
        validate_volume_name(name, "agent.data_volume")?;
        return Ok((name.to_string(), VolumeSource::GlobalConfig));
    }

    Ok((DEFAULT_DATA_VOLUME.to_string(), VolumeSource::Default))
}
