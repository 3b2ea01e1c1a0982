//! Idempotent container provisioning: create or start, then wait for sshd.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::environment::RetryPolicy;
use crate::errors::{Result, SessionError};
use crate::naming;
use crate::options::{CredentialMode, SessionCommandOptions};
use crate::ports::{PortRequest, SshPortAllocator};
use crate::resolve::{PlanAction, ResolvedTarget, ensure_owned};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, LABEL_CREATED, LABEL_DATA_VOLUME, LABEL_MANAGED,
    LABEL_SSH_PORT, LABEL_TYPE, LABEL_WORKSPACE, Mount, MountKind, TYPE_DEVCONTAINER,
};
use crate::ui::{self, StatusSpinner};

pub const DEFAULT_IMAGE: &str = "ghcr.io/novotnyllc/containai";
pub const TEMPLATE_IMAGE_PREFIX: &str = "containai-template-";
pub const DEFAULT_TEMPLATE: &str = "default";
pub const OCI_RUNTIME: &str = "sysbox-runc";
pub const WORKSPACE_MOUNT: &str = "/home/agent/workspace";
pub const DATA_VOLUME_MOUNT: &str = "/mnt/agent-data";
pub const ENV_SSH_PORT: &str = "CONTAINAI_SSH_PORT";
pub const ENV_CREDENTIALS: &str = "CONTAINAI_CREDENTIALS";

/// A running, reachable session container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredSession {
    pub container_name: String,
    pub workspace: PathBuf,
    pub data_volume: String,
    pub context: String,
    pub ssh_port: u16,
}

/// Image for a new container.
///
/// A non-default template selects the locally built `containai-template-<name>`.
/// Otherwise the published image is used, tagged by `--image-tag` or the channel.
pub fn select_image(
    template: Option<&str>,
    channel: Option<&str>,
    image_tag: Option<&str>,
) -> anyhow::Result<String> {
    if let Some(template) = template.map(str::trim).filter(|t| !t.is_empty())
        && template != DEFAULT_TEMPLATE
    {
        let name = naming::sanitize_component(template);
        if name.is_empty() {
            bail!("invalid template name '{}'", template);
        }
        return Ok(format!("{}{}", TEMPLATE_IMAGE_PREFIX, name));
    }

    let tag = match image_tag.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tag) => tag.to_string(),
        None => match channel.map(str::trim).unwrap_or("stable") {
            "" | "stable" => "latest".to_string(),
            "nightly" => "nightly".to_string(),
            other => bail!("unknown channel '{}'. Valid values: stable, nightly", other),
        },
    };
    Ok(format!("{}:{}", DEFAULT_IMAGE, tag))
}

/// Answers whether sshd is accepting connections on a loopback port.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, port: u16) -> bool;
}

/// Connects to `127.0.0.1:<port>` and expects an SSH identification banner.
#[derive(Debug, Clone, Copy)]
pub struct SshBannerProbe {
    pub timeout: Duration,
}

impl Default for SshBannerProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl ReadinessProbe for SshBannerProbe {
    async fn is_ready(&self, port: u16) -> bool {
        let connect = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
        )
        .await;
        let Ok(Ok(mut stream)) = connect else {
            return false;
        };
        let mut banner = [0u8; 4];
        matches!(
            tokio::time::timeout(self.timeout, stream.read_exact(&mut banner)).await,
            Ok(Ok(_))
        ) && &banner == b"SSH-"
    }
}

pub struct ContainerLifecycleService<'a> {
    runtime: &'a dyn ContainerRuntime,
    ports: &'a SshPortAllocator<'a>,
    readiness: &'a dyn ReadinessProbe,
    ready_policy: RetryPolicy,
    port_dir: PathBuf,
    cancel: CancellationToken,
}

impl<'a> ContainerLifecycleService<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        ports: &'a SshPortAllocator<'a>,
        readiness: &'a dyn ReadinessProbe,
        ready_policy: RetryPolicy,
        port_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            ports,
            readiness,
            ready_policy,
            port_dir,
            cancel,
        }
    }

    /// Bring the resolved container to a running, reachable state.
    ///
    /// Labels are re-read before any start or removal so a container that changed
    /// hands since resolution is never touched.
    pub async fn ensure_running(
        &self,
        options: &SessionCommandOptions,
        target: &ResolvedTarget,
        now: DateTime<Utc>,
    ) -> Result<EnsuredSession> {
        let exit_code = options.conflict_exit_code();
        let label = target.workspace_label();
        let name = target.container_name.as_str();
        let context = target.context.as_str();

        let port = match target.action {
            PlanAction::Attach => {
                let labels = self.runtime.inspect(context, name).await?;
                ensure_owned(name, &labels, &label, exit_code)?;
                // The published port is fixed at create time
                let Some(port) = labels.ssh_port else {
                    return Err(SessionError::MissingSshPort(name.to_string()));
                };
                if labels.is_running() {
                    tracing::debug!(container = name, "container already running");
                } else {
                    ui::step(options.quiet, format!("Starting {}", name));
                    self.runtime.start(context, name).await?;
                }
                port
            }
            PlanAction::Recreate => {
                let labels = self.runtime.inspect(context, name).await?;
                if labels.exists {
                    ensure_owned(name, &labels, &label, exit_code)?;
                    ui::step(options.quiet, format!("Removing {}", name));
                    self.runtime.remove(context, name).await?;
                }
                self.create(options, target, now).await?
            }
            PlanAction::Create => self.create(options, target, now).await?,
        };

        self.wait_ready(name, port, options.quiet).await?;

        Ok(EnsuredSession {
            container_name: target.container_name.clone(),
            workspace: target.workspace.clone(),
            data_volume: target.data_volume.clone(),
            context: target.context.clone(),
            ssh_port: port,
        })
    }

    async fn allocate(&self, target: &ResolvedTarget) -> Result<u16> {
        let label = target.workspace_label();
        let safe_name = target.safe_name();
        let allocation = self
            .ports
            .allocate(
                &PortRequest {
                    port_dir: &self.port_dir,
                    context: &target.context,
                    workspace: &label,
                    safe_name: &safe_name,
                },
                &self.cancel,
            )
            .await?;
        Ok(allocation.port)
    }

    async fn create(
        &self,
        options: &SessionCommandOptions,
        target: &ResolvedTarget,
        now: DateTime<Utc>,
    ) -> Result<u16> {
        let context = target.context.as_str();

        if target.generated_from_reset
            && !self.runtime.volume_exists(context, &target.data_volume).await?
        {
            ui::step(
                options.quiet,
                format!("Creating data volume {}", target.data_volume),
            );
            self.runtime
                .create_volume(context, &target.data_volume)
                .await?;
        }

        let port = self.allocate(target).await?;
        let image = select_image(
            options.template.as_deref(),
            options.channel.as_deref(),
            options.image_tag.as_deref(),
        )?;
        let volume_present = self
            .runtime
            .volume_exists(context, &target.data_volume)
            .await?;
        let spec = build_spec(options, target, &image, port, volume_present, now);

        ui::step(
            options.quiet,
            format!("Creating {} from {}", target.container_name, image),
        );
        self.runtime.create(context, &spec).await?;
        self.runtime.start(context, &target.container_name).await?;
        Ok(port)
    }

    async fn wait_ready(&self, name: &str, port: u16, quiet: bool) -> Result<()> {
        let spinner = StatusSpinner::start(format!("Waiting for sshd in {}", name), quiet);
        for attempt in 1..=self.ready_policy.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if self.readiness.is_ready(port).await {
                tracing::debug!(attempt, port, "sshd is ready");
                spinner.success(format!("{} is ready on port {}", name, port));
                return Ok(());
            }
            spinner.set_message(format!(
                "Waiting for sshd in {} ({}/{})",
                name, attempt, self.ready_policy.max_attempts
            ));
            if attempt < self.ready_policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.ready_policy.delay) => {}
                    _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                }
            }
        }

        spinner.failure(format!("{} did not become ready", name));
        Err(SessionError::StartupTimeout {
            container: name.to_string(),
            port,
            attempts: self.ready_policy.max_attempts,
        })
    }
}

fn build_spec(
    options: &SessionCommandOptions,
    target: &ResolvedTarget,
    image: &str,
    port: u16,
    volume_present: bool,
    now: DateTime<Utc>,
) -> ContainerSpec {
    let mut mounts = vec![Mount {
        kind: MountKind::Bind,
        source: target.workspace.to_string_lossy().into_owned(),
        target: WORKSPACE_MOUNT.to_string(),
        read_only: false,
    }];
    if volume_present {
        mounts.push(Mount {
            kind: MountKind::Volume,
            source: target.data_volume.clone(),
            target: DATA_VOLUME_MOUNT.to_string(),
            read_only: false,
        });
    } else {
        tracing::warn!(volume = %target.data_volume, "data volume does not exist; not mounting it");
        ui::warn(format!(
            "Data volume '{}' does not exist; starting without {}",
            target.data_volume, DATA_VOLUME_MOUNT
        ));
    }

    let mut env = BTreeMap::from([(ENV_SSH_PORT.to_string(), port.to_string())]);
    if options.credentials == CredentialMode::Host {
        env.insert(ENV_CREDENTIALS.to_string(), options.credentials.to_string());
    }

    let labels = BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_TYPE.to_string(), TYPE_DEVCONTAINER.to_string()),
        (LABEL_WORKSPACE.to_string(), target.workspace_label()),
        (LABEL_DATA_VOLUME.to_string(), target.data_volume.clone()),
        (LABEL_SSH_PORT.to_string(), port.to_string()),
        (
            LABEL_CREATED.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ]);

    ContainerSpec {
        name: target.container_name.clone(),
        image: image.to_string(),
        runtime: Some(OCI_RUNTIME.to_string()),
        ssh_port: port,
        env,
        labels,
        mounts,
        memory: options.memory.clone(),
        cpus: options.cpus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::PortRange;
    use crate::errors::EXIT_RESET_CONFLICT;
    use crate::options::SessionMode;
    use crate::ports::{FsPortLock, PortProbe};
    use crate::resolve::VolumeSource;
    use crate::runtime::fake::FakeRuntime;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CTX: &str = "containai-docker";
    const WS: &str = "/src/app";

    struct NothingBound;

    impl PortProbe for NothingBound {
        fn is_bound(&self, _port: u16) -> bool {
            false
        }
    }

    /// Ready after `after` failed probes.
    struct ReadyAfter {
        after: u32,
        calls: AtomicU32,
    }

    impl ReadyAfter {
        fn new(after: u32) -> Self {
            Self {
                after,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReadinessProbe for ReadyAfter {
        async fn is_ready(&self, _port: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.after
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap()
    }

    fn target(action: PlanAction) -> ResolvedTarget {
        ResolvedTarget {
            container_name: "app-main".into(),
            workspace: PathBuf::from(WS),
            data_volume: "app-data".into(),
            volume_source: VolumeSource::Default,
            context: CTX.into(),
            should_persist_state: true,
            created_by_this_invocation: action != PlanAction::Attach,
            generated_from_reset: false,
            action,
            existing: None,
        }
    }

    fn quiet() -> SessionCommandOptions {
        SessionCommandOptions {
            mode: SessionMode::Run,
            quiet: true,
            ..Default::default()
        }
    }

    async fn ensure(
        rt: &FakeRuntime,
        options: &SessionCommandOptions,
        target: &ResolvedTarget,
        ready: &dyn ReadinessProbe,
    ) -> (tempfile::TempDir, Result<EnsuredSession>) {
        let dir = tempfile::tempdir().unwrap();
        let lock = FsPortLock::new(dir.path().join(".ssh-port.lock"));
        let probe = NothingBound;
        let ports = SshPortAllocator::new(
            rt,
            &lock,
            &probe,
            PortRange::DEFAULT,
            RetryPolicy::immediate(1),
        );
        let service = ContainerLifecycleService::new(
            rt,
            &ports,
            ready,
            RetryPolicy::immediate(3),
            dir.path().join("ports"),
            CancellationToken::new(),
        );
        let result = service.ensure_running(options, target, now()).await;
        (dir, result)
    }

    #[tokio::test]
    async fn test_create_applies_flags_mounts_and_labels() {
        let rt = FakeRuntime::new()
            .with_context(CTX)
            .with_volume(CTX, "app-data");
        let mut options = quiet();
        options.memory = Some("4g".into());
        options.cpus = Some(2.0);
        let (_dir, result) = ensure(&rt, &options, &target(PlanAction::Create), &ReadyAfter::new(0)).await;
        let session = result.unwrap();
        assert_eq!(session.ssh_port, 2300);

        let container = rt.container("app-main").unwrap();
        assert!(container.running);
        let spec = container.spec.unwrap();
        assert_eq!(spec.image, "ghcr.io/novotnyllc/containai:latest");
        assert_eq!(spec.runtime.as_deref(), Some("sysbox-runc"));
        assert_eq!(spec.env[ENV_SSH_PORT], "2300");
        assert_eq!(spec.labels[LABEL_MANAGED], "true");
        assert_eq!(spec.labels[LABEL_TYPE], "devcontainer");
        assert_eq!(spec.labels[LABEL_WORKSPACE], WS);
        assert_eq!(spec.labels[LABEL_DATA_VOLUME], "app-data");
        assert_eq!(spec.labels[LABEL_SSH_PORT], "2300");
        assert_eq!(spec.labels[LABEL_CREATED], "2026-05-06T07:08:09Z");
        assert_eq!(spec.memory.as_deref(), Some("4g"));
        assert_eq!(spec.mounts.len(), 2);
        assert_eq!(spec.mounts[0].target, WORKSPACE_MOUNT);
        assert_eq!(spec.mounts[1].target, DATA_VOLUME_MOUNT);
        assert_eq!(spec.mounts[1].kind, MountKind::Volume);
    }

    #[tokio::test]
    async fn test_missing_volume_is_not_mounted() {
        let rt = FakeRuntime::new().with_context(CTX);
        let (_dir, result) =
            ensure(&rt, &quiet(), &target(PlanAction::Create), &ReadyAfter::new(0)).await;
        result.unwrap();
        let spec = rt.container("app-main").unwrap().spec.unwrap();
        assert_eq!(spec.mounts.len(), 1);
        assert!(!rt.has_volume(CTX, "app-data"));
    }

    #[tokio::test]
    async fn test_reset_volume_is_created() {
        let rt = FakeRuntime::new().with_context(CTX);
        let mut t = target(PlanAction::Create);
        t.generated_from_reset = true;
        t.data_volume = "app-20260506070809".into();
        let (_dir, result) = ensure(&rt, &quiet(), &t, &ReadyAfter::new(0)).await;
        result.unwrap();
        assert!(rt.has_volume(CTX, "app-20260506070809"));
        assert_eq!(rt.container("app-main").unwrap().spec.unwrap().mounts.len(), 2);
    }

    #[tokio::test]
    async fn test_attach_starts_stopped_container_on_label_port() {
        let rt = FakeRuntime::new().with_context(CTX).with_container(
            CTX,
            "app-main",
            &[
                (LABEL_MANAGED, "true"),
                (LABEL_WORKSPACE, WS),
                (LABEL_SSH_PORT, "2345"),
            ],
            false,
        );
        let (_dir, result) =
            ensure(&rt, &quiet(), &target(PlanAction::Attach), &ReadyAfter::new(1)).await;
        assert_eq!(result.unwrap().ssh_port, 2345);
        assert!(rt.container("app-main").unwrap().running);
        assert!(!rt.calls().iter().any(|c| c.starts_with("create ")));
    }

    #[tokio::test]
    async fn test_attach_without_port_label_requires_fresh() {
        for port_label in [None, Some("not-a-port")] {
            let mut labels = vec![(LABEL_MANAGED, "true"), (LABEL_WORKSPACE, WS)];
            if let Some(value) = port_label {
                labels.push((LABEL_SSH_PORT, value));
            }
            let rt = FakeRuntime::new()
                .with_context(CTX)
                .with_container(CTX, "app-main", &labels, false);
            let (dir, result) =
                ensure(&rt, &quiet(), &target(PlanAction::Attach), &ReadyAfter::new(0)).await;

            let err = result.unwrap_err();
            assert!(matches!(err, SessionError::MissingSshPort(ref c) if c == "app-main"));
            assert!(err.to_string().contains("--fresh"));
            assert_eq!(err.exit_code(), 1);
            assert!(rt.mutations().is_empty());
            assert!(!dir.path().join("ports").exists());
        }
    }

    #[tokio::test]
    async fn test_attach_rechecks_ownership() {
        // Labels changed hands between resolution and provisioning
        let rt = FakeRuntime::new()
            .with_context(CTX)
            .with_owned(CTX, "app-main", "/someone/else", "v");
        let mut options = quiet();
        options.mode = SessionMode::Shell;
        options.reset = true;
        let (_dir, result) =
            ensure(&rt, &options, &target(PlanAction::Attach), &ReadyAfter::new(0)).await;
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), EXIT_RESET_CONFLICT);
        assert!(rt.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_recreate_removes_then_creates() {
        let rt = FakeRuntime::new()
            .with_context(CTX)
            .with_owned(CTX, "app-main", WS, "old-data");
        let (_dir, result) =
            ensure(&rt, &quiet(), &target(PlanAction::Recreate), &ReadyAfter::new(0)).await;
        result.unwrap();
        assert_eq!(
            rt.mutations(),
            vec!["remove app-main", "create app-main", "start app-main"]
        );
        let labels = rt.container("app-main").unwrap().labels;
        assert_eq!(labels[LABEL_DATA_VOLUME], "app-data");
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let rt = FakeRuntime::new().with_context(CTX);
        let (_dir, result) =
            ensure(&rt, &quiet(), &target(PlanAction::Create), &ReadyAfter::new(10)).await;
        assert!(matches!(
            result,
            Err(SessionError::StartupTimeout { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_select_image() {
        assert_eq!(
            select_image(None, None, None).unwrap(),
            "ghcr.io/novotnyllc/containai:latest"
        );
        assert_eq!(
            select_image(None, Some("nightly"), None).unwrap(),
            "ghcr.io/novotnyllc/containai:nightly"
        );
        assert_eq!(
            select_image(Some("default"), Some("nightly"), Some("1.2.3")).unwrap(),
            "ghcr.io/novotnyllc/containai:1.2.3"
        );
        assert_eq!(
            select_image(Some("Rust Dev"), None, None).unwrap(),
            "containai-template-rust-dev"
        );
        assert!(select_image(None, Some("beta"), None).is_err());
        assert!(select_image(Some("!!!"), None, None).is_err());
    }

    #[tokio::test]
    async fn test_banner_probe_against_fake_sshd() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });
        assert!(SshBannerProbe::default().is_ready(port).await);
    }

    #[tokio::test]
    async fn test_banner_probe_closed_port() {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!SshBannerProbe::default().is_ready(port).await);
    }
}
