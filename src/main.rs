//! Entry point of the tracelab binary.
//!
//! Runs either a whole task group under the bounded-concurrency scheduler or a
//! single task in the foreground. All captures of the process share one proxy
//! port pool. Ctrl-C interrupts the running tasks, which persist their
//! progress so the same command resumes where they stopped.
use crate::error::{AppError, AppErrorKind};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracelab_capture::orchestrator::{
    CaptureOrchestrator, OrchestratorOptions, SystemComponents,
};
use tracelab_core::filter::FilterOptions;
use tracelab_core::port_pool::PortPool;
use tracelab_task::group::TaskGroup;
use tracelab_task::scheduler::{TaskGroupScheduler, TaskLoader};
use tracelab_task::task::{CaptureRunner, Perform, TaskStateMachine};
use tracing_subscriber::EnvFilter;

mod error;

#[derive(Debug, Parser, Default)]
#[clap(ignore_errors = true)]
struct PreCli {
    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every task of a task group descriptor.
    Group {
        #[clap(value_name = "GROUP_FILE")]
        descriptor: PathBuf,
    },
    /// Run a single task descriptor.
    Task {
        #[clap(value_name = "TASK_FILE")]
        descriptor: PathBuf,
    },
}

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE", global = true)]
    env_file: Option<String>,

    /// First port of the local proxy port range.
    #[clap(
        long,
        value_name = "PORT",
        env = "TRACELAB_PORT_RANGE_START",
        default_value = "7890"
    )]
    port_range_start: u16,

    /// Last port of the local proxy port range, inclusive.
    #[clap(
        long,
        value_name = "PORT",
        env = "TRACELAB_PORT_RANGE_END",
        default_value = "8010"
    )]
    port_range_end: u16,

    /// Seconds a capture waits for a free proxy port, 0 waits indefinitely.
    #[clap(
        long,
        value_name = "SECONDS",
        env = "TRACELAB_PORT_ACQUIRE_TIMEOUT",
        default_value = "600"
    )]
    port_acquire_timeout: u64,

    /// Scheduler polling interval in milliseconds.
    #[clap(
        long,
        value_name = "MILLISECONDS",
        env = "TRACELAB_POLL_INTERVAL",
        default_value = "5000"
    )]
    poll_interval: u64,

    /// Wait after loading an extension, in milliseconds.
    #[clap(
        long,
        value_name = "MILLISECONDS",
        env = "TRACELAB_SETTLE_DELAY",
        default_value = "3000"
    )]
    settle_delay: u64,

    /// Optional log level.
    #[clap(
        short = 'l',
        long,
        value_name = "LOG_LEVEL",
        env = "TRACELAB_LOG_LEVEL",
        default_value = "info"
    )]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let pre = PreCli::try_parse().unwrap_or_default();
    if let Some(env_file) = pre.env_file {
        dotenvy::from_filename(env_file)?;
    } else {
        dotenvy::dotenv().ok();
    }

    let cli = Cli::parse();

    let env = EnvFilter::new(format!(
        "tracelab={level},tracelab_core={level},tracelab_capture={level},tracelab_task={level},warn",
        level = cli.log_level
    ));
    let timer = tracing_subscriber::fmt::time::LocalTime::rfc_3339();
    tracing_subscriber::fmt()
        .with_timer(timer)
        .with_target(true)
        .with_env_filter(env)
        .init();

    if cli.port_range_start > cli.port_range_end {
        return Err(AppError::new(
            AppErrorKind::ArgumentError,
            format!(
                "port range {}-{} is empty",
                cli.port_range_start, cli.port_range_end
            )
            .as_str(),
        ));
    }
    let pool = Arc::new(PortPool::new(cli.port_range_start..=cli.port_range_end));
    let options = OrchestratorOptions {
        settle_delay: Duration::from_millis(cli.settle_delay),
        port_acquire_timeout: (cli.port_acquire_timeout > 0)
            .then(|| Duration::from_secs(cli.port_acquire_timeout)),
        filter: FilterOptions::default(),
    };
    let runner: Arc<dyn CaptureRunner> = Arc::new(CaptureOrchestrator::new(
        pool,
        Arc::new(SystemComponents),
        options,
    ));

    let stop = CancellationToken::new();
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the captures in progress");
            stop_signal.cancel();
        }
    });

    match cli.command {
        Command::Group { descriptor } => {
            let group = TaskGroup::load(&descriptor)?;
            let loader: TaskLoader = Arc::new(move |path: &Path| {
                Ok(Box::new(TaskStateMachine::load(path, runner.clone())?) as Box<dyn Perform>)
            });
            let mut scheduler =
                TaskGroupScheduler::new(group, loader, Duration::from_millis(cli.poll_interval));
            scheduler.run(stop).await?;
        }
        Command::Task { descriptor } => {
            let mut task = TaskStateMachine::load(&descriptor, runner)?;
            let status = tokio::task::spawn_blocking(move || task.run(&stop)).await??;
            info!("Task {:?} ended as {:?}", descriptor, status);
        }
    }
    Ok(())
}
