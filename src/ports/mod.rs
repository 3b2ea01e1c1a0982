//! SSH port allocation.
//!
//! Each workspace owns at most one loopback port, recorded in
//! `<configDir>/ports/devcontainer-<safe-name>`. Allocation runs under an
//! advisory lock so concurrent invocations never hand out the same port.
//!
//! Order of preference:
//! 1. the port already on file, if nothing is bound to it
//! 2. the port already on file, if it is bound by this workspace's own container
//! 3. the first port in range that is neither bound nor reserved by another
//!    workspace's port file or any container label
//! 4. [`FALLBACK_PORT`], not persisted

mod lock;
mod probe;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::environment::{PortRange, RetryPolicy};
use crate::errors::Result;
use crate::runtime::ContainerRuntime;

use lock::acquire;
pub use lock::{FsPortLock, LockGuard, PortLock};
pub use probe::{LocalPortProbe, PortProbe};

/// Returned when the whole range is taken.
pub const FALLBACK_PORT: u16 = 2322;

/// Prefix of every per-workspace port file.
pub const PORT_FILE_PREFIX: &str = "devcontainer-";

/// Path of the port file for a workspace.
pub fn port_file(port_dir: &Path, safe_name: &str) -> PathBuf {
    port_dir.join(format!("{}{}", PORT_FILE_PREFIX, safe_name))
}

/// Parse a port file. Missing, unreadable, or malformed files read as `None`.
pub fn read_port_file(path: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

fn write_port_file(path: &Path, port: u16) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, port.to_string())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Ports recorded by every workspace other than `own`.
fn ports_on_file(port_dir: &Path, own: &Path) -> BTreeSet<u16> {
    let Ok(entries) = std::fs::read_dir(port_dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path != own)
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PORT_FILE_PREFIX))
        })
        .filter_map(|path| read_port_file(&path))
        .collect()
}

/// Inputs for one allocation.
#[derive(Debug, Clone)]
pub struct PortRequest<'a> {
    pub port_dir: &'a Path,
    pub context: &'a str,
    /// Workspace label value.
    pub workspace: &'a str,
    pub safe_name: &'a str,
}

/// Where an allocated port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    PortFile,
    OwnContainer,
    Scanned,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub port: u16,
    pub source: PortSource,
}

pub struct SshPortAllocator<'a> {
    runtime: &'a dyn ContainerRuntime,
    lock: &'a dyn PortLock,
    probe: &'a dyn PortProbe,
    range: PortRange,
    lock_policy: RetryPolicy,
}

impl<'a> SshPortAllocator<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        lock: &'a dyn PortLock,
        probe: &'a dyn PortProbe,
        range: PortRange,
        lock_policy: RetryPolicy,
    ) -> Self {
        Self {
            runtime,
            lock,
            probe,
            range,
            lock_policy,
        }
    }

    pub async fn allocate(
        &self,
        request: &PortRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Allocation> {
        let _guard = acquire(self.lock, self.lock_policy, cancel).await?;
        let own_file = port_file(request.port_dir, request.safe_name);

        if let Some(port) = read_port_file(&own_file) {
            if !self.probe.is_bound(port) {
                tracing::debug!(port, "reusing recorded SSH port");
                return Ok(Allocation {
                    port,
                    source: PortSource::PortFile,
                });
            }
            if self.owned_by_workspace(request, port).await? {
                tracing::debug!(port, "recorded SSH port is held by this workspace's container");
                return Ok(Allocation {
                    port,
                    source: PortSource::OwnContainer,
                });
            }
            tracing::debug!(port, "recorded SSH port is taken, allocating a new one");
        }

        let mut reserved: BTreeSet<u16> = self
            .runtime
            .ssh_port_labels(request.context)
            .await?
            .into_iter()
            .collect();
        reserved.extend(ports_on_file(request.port_dir, &own_file));

        for port in self.range.iter() {
            if reserved.contains(&port) || self.probe.is_bound(port) {
                continue;
            }
            write_port_file(&own_file, port)?;
            tracing::info!(port, workspace = request.workspace, "allocated SSH port");
            return Ok(Allocation {
                port,
                source: PortSource::Scanned,
            });
        }

        tracing::warn!(
            start = self.range.start,
            end = self.range.end,
            "SSH port range exhausted; falling back to {}",
            FALLBACK_PORT
        );
        Ok(Allocation {
            port: FALLBACK_PORT,
            source: PortSource::Fallback,
        })
    }

    /// Remove the workspace's port file. Absent files are fine.
    pub async fn release(
        &self,
        port_dir: &Path,
        safe_name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let _guard = acquire(self.lock, self.lock_policy, cancel).await?;
        let path = port_file(port_dir, safe_name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to remove {}", path.display()))
                .into()),
        }
    }

    async fn owned_by_workspace(&self, request: &PortRequest<'_>, port: u16) -> Result<bool> {
        for name in self
            .runtime
            .find_by_workspace(request.context, request.workspace)
            .await?
        {
            let labels = self.runtime.inspect(request.context, &name).await?;
            if labels.is_owned_by(request.workspace) && labels.ssh_port == Some(port) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
