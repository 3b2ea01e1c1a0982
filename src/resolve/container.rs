use std::path::Path;

use crate::config::ConfigStore;
use crate::errors::{Result, SessionError};
use crate::git;
use crate::naming::{self, MAX_NAME_ATTEMPTS};
use crate::runtime::{ContainerLabelState, ContainerRuntime};

/// Outcome of container lookup for a workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSelection {
    pub name: String,
    /// Labels of the container to attach to; `None` when the name is free.
    pub existing: Option<ContainerLabelState>,
}

impl ContainerSelection {
    pub fn is_new(&self) -> bool {
        self.existing.is_none()
    }
}

/// Refuse to touch a container this workspace does not own.
pub fn ensure_owned(
    name: &str,
    labels: &ContainerLabelState,
    workspace: &str,
    exit_code: i32,
) -> Result<()> {
    let detail = if !labels.exists {
        "no longer exists".to_string()
    } else if !labels.is_owned {
        "is not managed by containai".to_string()
    } else {
        match labels.workspace.as_deref() {
            Some(ws) if ws == workspace => return Ok(()),
            Some(ws) => format!("belongs to workspace {}", ws),
            None => "has no workspace label".to_string(),
        }
    };
    Err(SessionError::OwnershipConflict {
        container: name.to_string(),
        detail,
        exit_code,
    })
}

/// Reject an explicit data volume that differs from the one the container was created with.
pub fn ensure_volume_matches(
    name: &str,
    labels: &ContainerLabelState,
    volume: &str,
    exit_code: i32,
) -> Result<()> {
    match labels.data_volume.as_deref() {
        Some(recorded) if recorded != volume => Err(SessionError::OwnershipConflict {
            container: name.to_string(),
            detail: format!("uses data volume '{}', not '{}'", recorded, volume),
            exit_code,
        }),
        _ => Ok(()),
    }
}

/// `{repo}-{branch}` for the workspace, before any collision suffix.
pub fn generated_base(workspace: &Path) -> String {
    naming::compose(&naming::repo_name(workspace), &git::branch_name(workspace))
}

/// Attach-vs-create decision for one workspace under one context.
pub struct ContainerSelector<'a> {
    runtime: &'a dyn ContainerRuntime,
    state: &'a dyn ConfigStore,
    conflict_exit_code: i32,
}

impl<'a> ContainerSelector<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        state: &'a dyn ConfigStore,
        conflict_exit_code: i32,
    ) -> Self {
        Self {
            runtime,
            state,
            conflict_exit_code,
        }
    }

    /// Saved name, then a label scan, then the generated name and its suffixed variants.
    pub async fn select(
        &self,
        workspace: &Path,
        workspace_label: &str,
        context: &str,
    ) -> Result<ContainerSelection> {
        if let Some(found) = self.find_existing(workspace, workspace_label, context).await? {
            return Ok(found);
        }
        self.generate(&generated_base(workspace), workspace_label, context)
            .await
    }

    /// An existing container owned by the workspace, without generating a new name.
    pub async fn find_existing(
        &self,
        workspace: &Path,
        workspace_label: &str,
        context: &str,
    ) -> Result<Option<ContainerSelection>> {
        if let Some(found) = self.saved(workspace, workspace_label, context).await? {
            return Ok(Some(found));
        }

        for name in self
            .runtime
            .find_by_workspace(context, workspace_label)
            .await?
        {
            let labels = self.runtime.inspect(context, &name).await?;
            if labels.is_owned_by(workspace_label) {
                tracing::debug!(container = %name, "found container by workspace label");
                return Ok(Some(ContainerSelection {
                    name,
                    existing: Some(labels),
                }));
            }
        }

        let base = generated_base(workspace);
        let labels = self.runtime.inspect(context, &base).await?;
        if labels.is_owned_by(workspace_label) {
            return Ok(Some(ContainerSelection {
                name: base,
                existing: Some(labels),
            }));
        }
        Ok(None)
    }

    async fn saved(
        &self,
        workspace: &Path,
        workspace_label: &str,
        context: &str,
    ) -> Result<Option<ContainerSelection>> {
        let Some(value) = self.state.get_workspace(workspace, "container_name")? else {
            return Ok(None);
        };
        let Some(name) = value.as_str() else {
            return Ok(None);
        };
        if naming::validate_container_name(name).is_err() {
            tracing::warn!(container = name, "ignoring invalid saved container name");
            return Ok(None);
        }

        let labels = self.runtime.inspect(context, name).await?;
        if labels.is_owned_by(workspace_label) {
            tracing::debug!(container = name, "reusing saved container");
            return Ok(Some(ContainerSelection {
                name: name.to_string(),
                existing: Some(labels),
            }));
        }
        if labels.exists {
            tracing::warn!(
                container = name,
                "saved container is not owned by this workspace, ignoring it"
            );
        }
        Ok(None)
    }

    /// Walk `base`, `base-2`, ... until a free or owned name turns up.
    async fn generate(
        &self,
        base: &str,
        workspace_label: &str,
        context: &str,
    ) -> Result<ContainerSelection> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = naming::candidate(base, attempt);
            let labels = self.runtime.inspect(context, &name).await?;
            if !labels.exists {
                return Ok(ContainerSelection {
                    name,
                    existing: None,
                });
            }
            if labels.is_owned_by(workspace_label) {
                return Ok(ContainerSelection {
                    name,
                    existing: Some(labels),
                });
            }
            if !labels.is_owned {
                // Never reuse or step around a container we did not create
                return Err(SessionError::OwnershipConflict {
                    container: name,
                    detail: "is not managed by containai".to_string(),
                    exit_code: self.conflict_exit_code,
                });
            }
            tracing::debug!(container = %name, "name taken by another workspace");
        }

        Err(SessionError::NameCollisionLimit {
            base: base.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}
