//! `cai stop`: stop, and optionally remove, the workspace's container.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, TomlConfigStore, discover_config};
use crate::environment::ResolutionContext;
use crate::errors::{EXIT_FAILURE, Result, SessionError, ValidationError};
use crate::naming;
use crate::ports::{PortLock, PortProbe, SshPortAllocator};
use crate::resolve::{
    ContainerSelector, ensure_owned, normalize_workspace, resolve_context, workspace_label,
};
use crate::runtime::ContainerRuntime;
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    pub workspace: Option<PathBuf>,
    pub container: Option<String>,
    /// Remove the container and release its SSH port after stopping.
    pub remove: bool,
    pub force: bool,
    pub quiet: bool,
}

/// What `stop` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NothingToStop,
    Stopped { container: String, removed: bool },
}

pub struct StopCommand<'a> {
    pub env: &'a ResolutionContext,
    pub runtime: &'a dyn ContainerRuntime,
    pub state: &'a dyn ConfigStore,
    pub lock: &'a dyn PortLock,
    pub probe: &'a dyn PortProbe,
    pub cancel: CancellationToken,
}

impl StopCommand<'_> {
    pub async fn execute(&self, options: &StopOptions) -> Result<StopOutcome> {
        if options.container.is_some() && options.workspace.is_some() {
            return Err(ValidationError::ContainerWithWorkspace.into());
        }

        let requested = options.workspace.as_deref().unwrap_or(&self.env.cwd);
        let local = normalize_workspace(requested, &self.env.cwd)?;
        let discovered = discover_config(&local, None, &self.env.user_config_file())?
            .map(TomlConfigStore::new);
        let context = resolve_context(
            self.runtime,
            self.env.context_override.as_deref(),
            discovered.as_ref().map(|s| s as &dyn ConfigStore),
            options.force,
        )
        .await?;

        let (name, workspace) = match &options.container {
            Some(name) => {
                naming::validate_container_name(name)?;
                let labels = self.runtime.inspect(&context, name).await?;
                let Some(workspace) = labels.workspace.clone().filter(|_| labels.is_owned) else {
                    let detail = if labels.exists {
                        "is not managed by containai"
                    } else {
                        "does not exist"
                    };
                    return Err(SessionError::OwnershipConflict {
                        container: name.clone(),
                        detail: detail.to_string(),
                        exit_code: EXIT_FAILURE,
                    });
                };
                (name.clone(), PathBuf::from(workspace))
            }
            None => {
                let label = workspace_label(&local);
                let found = ContainerSelector::new(self.runtime, self.state, EXIT_FAILURE)
                    .find_existing(&local, &label, &context)
                    .await?;
                match found {
                    Some(selection) => (selection.name, local),
                    None => {
                        ui::step(
                            options.quiet,
                            format!("No container found for {}", local.display()),
                        );
                        return Ok(StopOutcome::NothingToStop);
                    }
                }
            }
        };

        let label = workspace_label(&workspace);
        let labels = self.runtime.inspect(&context, &name).await?;
        ensure_owned(&name, &labels, &label, EXIT_FAILURE)?;

        if labels.is_running() {
            ui::step(options.quiet, format!("Stopping {}", name));
            self.runtime.stop(&context, &name).await?;
        } else {
            tracing::debug!(container = %name, "container already stopped");
        }

        if options.remove {
            ui::step(options.quiet, format!("Removing {}", name));
            self.runtime.remove(&context, &name).await?;

            let range = crate::config::port_range(self.state)?;
            let ports = SshPortAllocator::new(
                self.runtime,
                self.lock,
                self.probe,
                range,
                self.env.lock_policy,
            );
            let safe_name = naming::workspace_safe_name(&workspace);
            if ports
                .release(&self.env.ports_dir(), &safe_name, &self.cancel)
                .await?
            {
                tracing::info!(container = %name, "released SSH port");
            }
        }

        Ok(StopOutcome::Stopped {
            container: name,
            removed: options.remove,
        })
    }
}
