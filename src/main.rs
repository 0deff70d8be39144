//! husk: run a command in a throwaway container as the current user.
//!
//! `husk alpine make test` pulls the image, creates a container running as
//! the invoking uid:gid with the current directory mounted as its working
//! directory, executes the command, and removes everything it created.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;

use husk::config::Config;
use husk::host_user::HostUser;
use husk::{ExecMode, RunRequest, RunResult, Runner};

/// Exit code for engine and orchestration failures, distinct from any
/// command exit status.
const EXIT_ENGINE_FAILURE: i32 = 125;

#[derive(Parser)]
#[command(name = "husk", version)]
#[command(about = "Run a command in a throwaway container as the current user")]
struct Cli {
    /// Container image to run the command in
    image: String,

    /// Command and arguments to execute inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,

    /// Host directory mounted into the container as the working directory
    #[arg(long, default_value = ".")]
    work_dir: String,

    /// Host directory mounted as the user's home inside the container
    #[arg(long)]
    home_dir: Option<PathBuf>,

    /// Keep the ephemeral home volume instead of deleting it after the run
    #[arg(long)]
    persist_home: bool,

    /// Give the container a copy of the work directory; changes are never
    /// written back to the host
    #[arg(long)]
    volatile_work: bool,

    /// How the command is executed
    #[arg(long, value_enum)]
    exec_mode: Option<ExecMode>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    husk::logging::init(if cli.verbose { "debug" } else { "info" });

    match run(cli).await {
        Ok(result) => process::exit(result.status_code as i32),
        Err(e) => {
            error!("{:#}", e);
            process::exit(EXIT_ENGINE_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunResult> {
    let config = Config::load()?;
    let user = HostUser::current()?;

    let request = RunRequest {
        image: cli.image,
        command: cli.command,
        work_dir: cli.work_dir,
        home_dir: cli.home_dir,
        persist_home: cli.persist_home,
        volatile_work: cli.volatile_work,
        exec_mode: cli.exec_mode.or(config.run.exec_mode).unwrap_or_default(),
        user,
        stop_timeout_secs: config.engine.stop_timeout_secs,
    };

    tracing::debug!(
        "image={} command={:?} work_dir={} home_dir={:?} persist_home={} volatile_work={} exec_mode={:?} user={}",
        request.image,
        request.command,
        request.work_dir,
        request.home_dir,
        request.persist_home,
        request.volatile_work,
        request.exec_mode,
        request.user.uid_gid(),
    );

    let runner = Runner::connect().await?;
    let result = runner.run(&request).await?;

    if let Some(message) = &result.engine_error {
        tracing::warn!("command terminated abnormally: {}", message);
    }

    Ok(result)
}
