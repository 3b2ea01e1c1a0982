use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{
    ContainerLabelState, ContainerRuntime, ContainerSpec, LABEL_MANAGED, LABEL_SSH_PORT,
    LABEL_WORKSPACE, MountKind,
};
use crate::errors::{Result, SessionError};
use crate::process::{self, CommandOutput};

/// Separator between state and label JSON in the inspect template.
const INSPECT_FORMAT: &str = "{{.State.Status}}\t{{json .Config.Labels}}";

/// `ContainerRuntime` backed by a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    cancel: CancellationToken,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            bin: bin.into(),
            cancel,
        }
    }

    fn command(&self, context: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.bin);
        if let Some(context) = context {
            cmd.args(["--context", context]);
        }
        cmd
    }

    async fn run(&self, cmd: Command) -> Result<CommandOutput> {
        process::capture(cmd, &self.cancel).await
    }

    /// Run and require a zero exit status.
    async fn run_checked(&self, cmd: Command) -> Result<CommandOutput> {
        let description = process::describe(&cmd);
        let output = self.run(cmd).await?;
        if !output.success() {
            return Err(SessionError::Runtime {
                command: description,
                code: output.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Whether a failed inspect means "no such object" rather than a real failure.
fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such") || lower.contains("not found")
}

/// Parse `{{.State.Status}}\t{{json .Config.Labels}}` output.
fn parse_inspect_output(stdout: &str) -> anyhow::Result<ContainerLabelState> {
    let line = stdout.lines().next().unwrap_or_default();
    let (state, labels_json) = line.split_once('\t').unwrap_or((line, "null"));
    let labels: Option<HashMap<String, String>> = serde_json::from_str(labels_json.trim())
        .with_context(|| format!("Failed to parse container labels: {}", labels_json))?;
    Ok(ContainerLabelState::from_labels(
        &labels.unwrap_or_default(),
        Some(state.trim().to_string()),
    ))
}

fn parse_port_lines(stdout: &str) -> Vec<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

fn format_cpus(cpus: f64) -> String {
    if cpus.fract() == 0.0 {
        format!("{}", cpus as u64)
    } else {
        format!("{}", cpus)
    }
}

/// Arguments for `docker create` (after any `--context`).
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--hostname".to_string(),
        spec.name.clone(),
    ];

    if let Some(runtime) = &spec.runtime {
        args.push(format!("--runtime={}", runtime));
    }

    args.push("-p".to_string());
    args.push(format!("127.0.0.1:{}:22", spec.ssh_port));

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.mounts {
        let kind = match mount.kind {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
        };
        let mut value = format!("type={},source={},target={}", kind, mount.source, mount.target);
        if mount.read_only {
            value.push_str(",readonly");
        }
        args.push("--mount".to_string());
        args.push(value);
    }

    if let Some(memory) = &spec.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(cpus) = spec.cpus {
        args.push("--cpus".to_string());
        args.push(format_cpus(cpus));
    }

    args.push(spec.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn context_exists(&self, context: &str) -> Result<bool> {
        let mut cmd = self.command(None);
        cmd.args(["context", "inspect", context]);
        Ok(self.run(cmd).await?.success())
    }

    async fn volume_exists(&self, context: &str, volume: &str) -> Result<bool> {
        let mut cmd = self.command(Some(context));
        cmd.args(["volume", "inspect", volume]);
        let description = process::describe(&cmd);
        let output = self.run(cmd).await?;
        if output.success() {
            return Ok(true);
        }
        if is_not_found(&output.stderr) {
            return Ok(false);
        }
        Err(SessionError::Runtime {
            command: description,
            code: output.code(),
            stderr: output.stderr.trim().to_string(),
        })
    }

    async fn create_volume(&self, context: &str, volume: &str) -> Result<()> {
        let mut cmd = self.command(Some(context));
        cmd.args(["volume", "create", "--label"])
            .arg(format!("{}=true", LABEL_MANAGED))
            .arg(volume);
        self.run_checked(cmd).await?;
        Ok(())
    }

    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState> {
        let mut cmd = self.command(Some(context));
        cmd.args(["inspect", "--type", "container", "--format", INSPECT_FORMAT, name]);
        let description = process::describe(&cmd);
        let output = self.run(cmd).await?;
        if !output.success() {
            if is_not_found(&output.stderr) {
                return Ok(ContainerLabelState::missing());
            }
            return Err(SessionError::Runtime {
                command: description,
                code: output.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_inspect_output(&output.stdout)?)
    }

    async fn find_by_workspace(&self, context: &str, workspace: &str) -> Result<Vec<String>> {
        let mut cmd = self.command(Some(context));
        cmd.args(["ps", "-a", "--filter"])
            .arg(format!("label={}=true", LABEL_MANAGED))
            .arg("--filter")
            .arg(format!("label={}={}", LABEL_WORKSPACE, workspace))
            .args(["--format", "{{.Names}}"]);
        let output = self.run_checked(cmd).await?;
        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn ssh_port_labels(&self, context: &str) -> Result<Vec<u16>> {
        let mut cmd = self.command(Some(context));
        cmd.args(["ps", "-a", "--filter"])
            .arg(format!("label={}", LABEL_SSH_PORT))
            .arg("--format")
            .arg(format!("{{{{.Label \"{}\"}}}}", LABEL_SSH_PORT));
        let output = self.run_checked(cmd).await?;
        Ok(parse_port_lines(&output.stdout))
    }

    async fn create(&self, context: &str, spec: &ContainerSpec) -> Result<()> {
        let mut cmd = self.command(Some(context));
        cmd.args(create_args(spec));
        self.run_checked(cmd).await?;
        Ok(())
    }

    async fn start(&self, context: &str, name: &str) -> Result<()> {
        let mut cmd = self.command(Some(context));
        cmd.args(["start", name]);
        self.run_checked(cmd).await?;
        Ok(())
    }

    async fn stop(&self, context: &str, name: &str) -> Result<()> {
        let mut cmd = self.command(Some(context));
        cmd.args(["stop", name]);
        self.run_checked(cmd).await?;
        Ok(())
    }

    async fn remove(&self, context: &str, name: &str) -> Result<()> {
        let mut cmd = self.command(Some(context));
        cmd.args(["rm", "-f", name]);
        self.run_checked(cmd).await?;
        Ok(())
    }
}
