use console::style;
use tokio_util::sync::CancellationToken;

use containai::config::TomlConfigStore;
use containai::environment::ResolutionContext;
use containai::errors::Result;
use containai::ports::{FsPortLock, LocalPortProbe};
use containai::runtime::DockerCli;
use containai::stop::{StopCommand, StopOptions, StopOutcome};
use containai::ui::icons::CHECK;

pub async fn cmd_stop(
    env: &ResolutionContext,
    options: &StopOptions,
    cancel: CancellationToken,
) -> Result<i32> {
    let runtime = DockerCli::new(env.docker_bin.clone(), cancel.clone());
    let state = TomlConfigStore::new(env.user_config_file());
    let lock = FsPortLock::new(env.port_lock_file());

    let outcome = StopCommand {
        env,
        runtime: &runtime,
        state: &state,
        lock: &lock,
        probe: &LocalPortProbe,
        cancel,
    }
    .execute(options)
    .await?;

    if let StopOutcome::Stopped { container, removed } = outcome
        && !options.quiet
    {
        let verb = if removed { "Removed" } else { "Stopped" };
        println!("{}{} {}", CHECK, verb, style(container).cyan());
    }
    Ok(0)
}
