use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use containai::environment::ResolutionContext;
use containai::errors::{EXIT_FAILURE, SessionError};
use containai::options::{CredentialMode, SessionCommandOptions, SessionMode};
use containai::stop::StopOptions;
use containai::ui::icons::CROSS;

mod cmd;

#[derive(Parser)]
#[command(name = "cai")]
#[command(
    version,
    about = "Sandboxed agent sessions, one container per workspace"
)]
pub struct Cli {
    /// Show resolution and provisioning details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging, and verbose SSH
    #[arg(long, global = true)]
    pub debug: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the agent (or a given command) in the workspace container
    Run {
        #[command(flatten)]
        session: SessionArgs,

        /// Agent to launch when no command is given
        #[arg(long)]
        agent: Option<String>,

        /// Start in the background and print the PID
        #[arg(short, long)]
        detached: bool,

        /// Command to run instead of the agent
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Open a login shell in the workspace container
    Shell {
        #[command(flatten)]
        session: SessionArgs,

        /// Start over with a fresh data volume and container
        #[arg(long)]
        reset: bool,
    },
    /// Run one command in the workspace container and return its exit status
    Exec {
        #[command(flatten)]
        session: SessionArgs,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Stop the workspace container
    Stop {
        /// Workspace directory (defaults to the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Stop this container instead of the workspace's
        #[arg(long)]
        container: Option<String>,

        /// Also remove the container and release its SSH port
        #[arg(long)]
        remove: bool,

        /// Use the default runtime context when no isolated one exists
        #[arg(long)]
        force: bool,
    },
}

/// Flags shared by `run`, `shell`, and `exec`.
#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Attach to, or create, this container
    #[arg(long)]
    pub container: Option<String>,

    /// Data volume to mount at /mnt/agent-data
    #[arg(long)]
    pub data_volume: Option<String>,

    /// Config file (defaults to the nearest .containai/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Image template
    #[arg(long)]
    pub template: Option<String>,

    #[arg(long)]
    pub image_tag: Option<String>,

    /// Release channel: stable or nightly
    #[arg(long)]
    pub channel: Option<String>,

    /// Memory limit, e.g. 8g
    #[arg(long)]
    pub memory: Option<String>,

    #[arg(long)]
    pub cpus: Option<f64>,

    /// Credential mode: none or host
    #[arg(long, default_value = "none")]
    pub credentials: CredentialMode,

    #[arg(long)]
    pub acknowledge_credential_risk: bool,

    /// Recreate the container
    #[arg(long)]
    pub fresh: bool,

    /// Use the default runtime context when no isolated one exists
    #[arg(long)]
    pub force: bool,

    /// Print what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Environment for the remote command, KEY=VALUE
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,
}

impl SessionArgs {
    fn into_options(self, cli: &Cli, mode: SessionMode) -> SessionCommandOptions {
        SessionCommandOptions {
            mode,
            workspace: self.workspace,
            container: self.container,
            data_volume: self.data_volume,
            config: self.config,
            template: self.template,
            image_tag: self.image_tag,
            channel: self.channel,
            memory: self.memory,
            cpus: self.cpus,
            credentials: self.credentials,
            acknowledge_credential_risk: self.acknowledge_credential_risk,
            fresh: self.fresh,
            force: self.force,
            dry_run: self.dry_run,
            env: self.env,
            quiet: cli.quiet,
            verbose: cli.verbose,
            debug: cli.debug,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    containai::logging::init(cli.verbose, cli.debug);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let code = match run(&cli, cancel).await {
        Ok(code) => code,
        Err(err) if err.is_cancelled() => err.exit_code(),
        Err(err) => {
            eprintln!("{}{}", CROSS, style(&err).red());
            err.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli, cancel: CancellationToken) -> Result<i32, SessionError> {
    let env = ResolutionContext::from_process()?;

    let options = match &cli.command {
        Commands::Run {
            session,
            agent,
            detached,
            command,
        } => SessionCommandOptions {
            agent: agent.clone(),
            detached: *detached,
            command: command.clone(),
            ..session.clone().into_options(cli, SessionMode::Run)
        },
        Commands::Shell { session, reset } => SessionCommandOptions {
            reset: *reset,
            ..session.clone().into_options(cli, SessionMode::Shell)
        },
        Commands::Exec { session, command } => SessionCommandOptions {
            command: command.clone(),
            ..session.clone().into_options(cli, SessionMode::Exec)
        },
        Commands::Stop {
            workspace,
            container,
            remove,
            force,
        } => {
            let options = StopOptions {
                workspace: workspace.clone(),
                container: container.clone(),
                remove: *remove,
                force: *force,
                quiet: cli.quiet,
            };
            return cmd::cmd_stop(&env, &options, cancel).await;
        }
    };

    tracing::debug!(mode = %options.mode, "starting session command");
    let code = cmd::cmd_session(&env, &options, cancel).await?;
    if code != 0 {
        tracing::debug!(code, "remote command exited non-zero");
    }
    Ok(if code < 0 { EXIT_FAILURE } else { code })
}
