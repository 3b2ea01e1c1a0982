//! The session pipeline: resolve, provision, persist.
//!
//! ```text
//! options ─► validate ─► volume + context ─► container ─┬─► dry-run plan
//!                                                       └─► ensure running ─► persist ─► ready
//! ```
//!
//! Bridging over SSH is left to the caller.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::{self, ConfigStore};
use crate::environment::ResolutionContext;
use crate::errors::Result;
use crate::lifecycle::{ContainerLifecycleService, EnsuredSession, ReadinessProbe};
use crate::options::SessionCommandOptions;
use crate::ports::{PortLock, PortProbe, SshPortAllocator};
use crate::resolve::{ResolvedTarget, Resolver};
use crate::runtime::ContainerRuntime;
use crate::state::SessionStateStore;
use crate::ui;

/// Result of preparing a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// `--dry-run`: what would happen, with nothing changed.
    Plan(ResolvedTarget),
    Ready(EnsuredSession),
}

/// Collaborators for one invocation.
pub struct SessionPipeline<'a> {
    pub env: &'a ResolutionContext,
    pub runtime: &'a dyn ContainerRuntime,
    /// User config; holds per-workspace state and the SSH port range.
    pub state: &'a dyn ConfigStore,
    pub lock: &'a dyn PortLock,
    pub probe: &'a dyn PortProbe,
    pub readiness: &'a dyn ReadinessProbe,
    pub cancel: CancellationToken,
}

impl SessionPipeline<'_> {
    pub async fn prepare(&self, options: &SessionCommandOptions) -> Result<Prepared> {
        let now = Utc::now();
        let target = Resolver::new(self.runtime, self.env, self.state)
            .resolve(options, now)
            .await?;

        if options.dry_run {
            return Ok(Prepared::Plan(target));
        }

        let range = config::port_range(self.state)?;
        let ports = SshPortAllocator::new(
            self.runtime,
            self.lock,
            self.probe,
            range,
            self.env.lock_policy,
        );
        let lifecycle = ContainerLifecycleService::new(
            self.runtime,
            &ports,
            self.readiness,
            self.env.ready_policy,
            self.env.ports_dir(),
            self.cancel.clone(),
        );
        let session = lifecycle.ensure_running(options, &target, now).await?;

        if let Err(e) = SessionStateStore::new(self.state).persist(&target, &session) {
            tracing::warn!("failed to save session state: {:#}", e);
            ui::warn(format!("Could not save session state: {}", e));
        }

        Ok(Prepared::Ready(session))
    }
}
