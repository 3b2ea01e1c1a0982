//! Per-workspace session state written back to the user config.

use anyhow::Result;

use crate::config::ConfigStore;
use crate::lifecycle::EnsuredSession;
use crate::resolve::ResolvedTarget;

pub const KEY_CONTAINER_NAME: &str = "container_name";
pub const KEY_DATA_VOLUME: &str = "data_volume";

pub struct SessionStateStore<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> SessionStateStore<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    /// Record the session so the next invocation resolves to the same container.
    ///
    /// The container name is always written. The data volume is skipped when it
    /// came from `CONTAINAI_DATA_VOLUME`, so a one-off override does not stick.
    pub fn persist(&self, target: &ResolvedTarget, session: &EnsuredSession) -> Result<()> {
        self.store.set_workspace(
            &session.workspace,
            KEY_CONTAINER_NAME,
            &session.container_name,
        )?;
        if target.should_persist_state {
            self.store
                .set_workspace(&session.workspace, KEY_DATA_VOLUME, &session.data_volume)?;
        }
        tracing::debug!(
            workspace = %session.workspace.display(),
            volume_saved = target.should_persist_state,
            "saved session state"
        );
        Ok(())
    }
}
