//! `cai run`, `cai shell`, and `cai exec`.

use console::style;
use tokio_util::sync::CancellationToken;

use containai::config::TomlConfigStore;
use containai::environment::ResolutionContext;
use containai::errors::Result;
use containai::lifecycle::SshBannerProbe;
use containai::options::SessionCommandOptions;
use containai::ports::{self, FsPortLock, LocalPortProbe};
use containai::remote::{RemoteExecutor, RemoteOutcome};
use containai::resolve::ResolvedTarget;
use containai::runtime::DockerCli;
use containai::session::{Prepared, SessionPipeline};
use containai::ui::icons::PLAN;

/// Prepare the session and bridge into it. Returns the process exit code.
pub async fn cmd_session(
    env: &ResolutionContext,
    options: &SessionCommandOptions,
    cancel: CancellationToken,
) -> Result<i32> {
    let runtime = DockerCli::new(env.docker_bin.clone(), cancel.clone());
    let state = TomlConfigStore::new(env.user_config_file());
    let lock = FsPortLock::new(env.port_lock_file());
    let readiness = SshBannerProbe::default();

    let pipeline = SessionPipeline {
        env,
        runtime: &runtime,
        state: &state,
        lock: &lock,
        probe: &LocalPortProbe,
        readiness: &readiness,
        cancel: cancel.clone(),
    };

    match pipeline.prepare(options).await? {
        Prepared::Plan(target) => {
            print_plan(env, options, &target);
            Ok(0)
        }
        Prepared::Ready(session) => {
            let outcome = RemoteExecutor::new(env, cancel)
                .execute(options, &session)
                .await?;
            if let RemoteOutcome::Detached { pid } = outcome
                && !options.quiet
            {
                println!(
                    "{} started in {} (pid {})",
                    style("Agent").green(),
                    style(&session.container_name).cyan(),
                    pid
                );
            }
            Ok(outcome.exit_code())
        }
    }
}

fn print_plan(env: &ResolutionContext, options: &SessionCommandOptions, target: &ResolvedTarget) {
    println!("{}{}", PLAN, style(format!("Dry run: {}", options.mode)).bold());
    let row = |key: &str, value: &str| println!("  {:<12} {}", style(key).dim(), value);

    row("container", &target.container_name);
    row("workspace", &target.workspace.display().to_string());
    row(
        "volume",
        &format!("{} ({})", target.data_volume, target.volume_source),
    );
    row("context", &target.context);
    row("action", &style(target.action).cyan().to_string());
    if let Some(replaced) = target.replaces() {
        row("replaces", replaced);
    }

    let port_file = ports::port_file(&env.ports_dir(), &target.safe_name());
    match ports::read_port_file(&port_file) {
        Some(port) => row("ssh port", &port.to_string()),
        None => row("ssh port", "allocated on start"),
    }
}
