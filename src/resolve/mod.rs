//! Session resolution: which workspace, data volume, context, and container
//! one invocation targets, and whether it attaches, creates, or recreates.
//!
//! Resolution reads the runtime and config but never mutates either, so the
//! same [`ResolvedTarget`] drives both dry-run plans and real provisioning.

mod container;
mod context;
mod volume;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::{ConfigStore, TomlConfigStore, discover_config};
use crate::environment::ResolutionContext;
use crate::errors::{Result, SessionError, ValidationError};
use crate::naming;
use crate::options::SessionCommandOptions;
use crate::runtime::{ContainerLabelState, ContainerRuntime};

pub use container::{
    ContainerSelection, ContainerSelector, ensure_owned, ensure_volume_matches, generated_base,
};
pub use context::{DEFAULT_CONTEXT, FALLBACK_CONTEXTS, resolve_context};
pub use volume::{DEFAULT_DATA_VOLUME, VolumeLookup, VolumeSource, resolve_data_volume};

/// What provisioning will do with the target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Attach,
    /// Remove the existing container, then create it again.
    Recreate,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanAction::Create => write!(f, "create"),
            PlanAction::Attach => write!(f, "attach"),
            PlanAction::Recreate => write!(f, "recreate"),
        }
    }
}

/// The fully resolved target of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub container_name: String,
    /// Absolute, normalized workspace path.
    pub workspace: PathBuf,
    pub data_volume: String,
    pub volume_source: VolumeSource,
    pub context: String,
    pub should_persist_state: bool,
    pub created_by_this_invocation: bool,
    pub generated_from_reset: bool,
    pub action: PlanAction,
    /// Labels of the container as last read, if it exists.
    pub existing: Option<ContainerLabelState>,
}

impl ResolvedTarget {
    /// Value of the `containai.devcontainer.workspace` label.
    pub fn workspace_label(&self) -> String {
        workspace_label(&self.workspace)
    }

    pub fn safe_name(&self) -> String {
        naming::workspace_safe_name(&self.workspace)
    }

    /// Container removed before creation, if any.
    pub fn replaces(&self) -> Option<&str> {
        (self.action == PlanAction::Recreate).then_some(self.container_name.as_str())
    }
}

pub fn workspace_label(workspace: &Path) -> String {
    workspace.to_string_lossy().into_owned()
}

/// Absolute, symlink-free form of `path`, which must be an existing directory.
pub fn normalize_workspace(path: &Path, cwd: &Path) -> Result<PathBuf, ValidationError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    match std::fs::canonicalize(&absolute) {
        Ok(canonical) if canonical.is_dir() => Ok(canonical),
        _ => Err(ValidationError::WorkspaceNotFound(absolute)),
    }
}

pub struct Resolver<'a> {
    runtime: &'a dyn ContainerRuntime,
    env: &'a ResolutionContext,
    /// User config carrying per-workspace state.
    state: &'a dyn ConfigStore,
}

impl<'a> Resolver<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        env: &'a ResolutionContext,
        state: &'a dyn ConfigStore,
    ) -> Self {
        Self {
            runtime,
            env,
            state,
        }
    }

    /// Run the full resolution pipeline. `now` names a `--reset` volume.
    pub async fn resolve(
        &self,
        options: &SessionCommandOptions,
        now: DateTime<Utc>,
    ) -> Result<ResolvedTarget> {
        options.validate()?;
        let exit_code = options.conflict_exit_code();

        let requested = options.workspace.as_deref().unwrap_or(&self.env.cwd);
        let local = normalize_workspace(requested, &self.env.cwd)?;

        let user_config = self.env.user_config_file();
        let discovered_path = discover_config(&local, options.config.as_deref(), &user_config)?;
        let discovered = discovered_path.as_deref().map(TomlConfigStore::new);
        let config = discovered.as_ref().map(|s| s as &dyn ConfigStore);
        if let Some(path) = &discovered_path {
            tracing::debug!(config = %path.display(), "using config");
        }

        let context = resolve_context(
            self.runtime,
            self.env.context_override.as_deref(),
            config,
            options.force,
        )
        .await?;

        let (workspace, container_name, existing) = match &options.container {
            Some(name) => self.named_container(name, local, &context, exit_code).await?,
            None => {
                let label = workspace_label(&local);
                let selection = ContainerSelector::new(self.runtime, self.state, exit_code)
                    .select(&local, &label, &context)
                    .await?;
                (local, selection.name, selection.existing)
            }
        };

        let (mut data_volume, mut volume_source) = if options.is_reset() {
            (
                naming::reset_volume_name(&workspace, now),
                VolumeSource::Reset,
            )
        } else {
            let discovered_is_state = discovered_path.as_deref() == Some(user_config.as_path());
            resolve_data_volume(
                options.data_volume.as_deref(),
                self.env.data_volume_override.as_deref(),
                &VolumeLookup {
                    workspace: &workspace,
                    state: self.state,
                    workspace_config: if discovered_is_state { None } else { config },
                    global_config: config,
                },
            )?
        };

        let action = match &existing {
            None => PlanAction::Create,
            Some(_) if options.fresh || options.is_reset() => PlanAction::Recreate,
            Some(labels) => {
                if volume_source.is_explicit() {
                    ensure_volume_matches(&container_name, labels, &data_volume, exit_code)?;
                } else if let Some(recorded) = &labels.data_volume
                    && *recorded != data_volume
                {
                    tracing::debug!(
                        recorded = %recorded,
                        resolved = %data_volume,
                        "keeping the container's data volume"
                    );
                    data_volume = recorded.clone();
                    volume_source = VolumeSource::ContainerLabel;
                }
                PlanAction::Attach
            }
        };

        let generated_from_reset = volume_source == VolumeSource::Reset;
        let target = ResolvedTarget {
            container_name,
            workspace,
            should_persist_state: volume_source != VolumeSource::Environment,
            data_volume,
            volume_source,
            context,
            created_by_this_invocation: action != PlanAction::Attach,
            generated_from_reset,
            action,
            existing,
        };
        tracing::info!(
            container = %target.container_name,
            volume = %target.data_volume,
            context = %target.context,
            action = %target.action,
            "resolved session"
        );
        Ok(target)
    }

    /// `--container NAME`: an existing container must be ours and decides the workspace.
    async fn named_container(
        &self,
        name: &str,
        cwd: PathBuf,
        context: &str,
        exit_code: i32,
    ) -> Result<(PathBuf, String, Option<ContainerLabelState>)> {
        naming::validate_container_name(name)?;
        let labels = self.runtime.inspect(context, name).await?;
        if !labels.exists {
            return Ok((cwd, name.to_string(), None));
        }

        let conflict = |detail: &str| SessionError::OwnershipConflict {
            container: name.to_string(),
            detail: detail.to_string(),
            exit_code,
        };
        if !labels.is_owned {
            return Err(conflict("is not managed by containai"));
        }
        let Some(workspace) = labels.workspace.clone() else {
            return Err(conflict("has no workspace label"));
        };
        Ok((PathBuf::from(workspace), name.to_string(), Some(labels)))
    }
}
