//! `artgen` -- prompt-file image generation worker.
//!
//! Expands a prompt file into generation jobs and runs them one at a time
//! against the configured backend, finalizing each result into a tagged
//! JPEG. Type `p`, `r`, `q` or `s` followed by Enter to pause, reload,
//! quit (while paused) or print status.
//!
//! Configuration comes from `ARTGEN_*` environment variables; see
//! [`artgen_worker::config::WorkerConfig::from_env`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use artgen_pipeline::device::DeviceProbe;
use artgen_pipeline::runner::JobRunner;
use artgen_worker::config::WorkerConfig;
use artgen_worker::control::{self, COMMAND_HELP, CONTROL_CHANNEL_CAPACITY};
use artgen_worker::dispatcher::Dispatcher;
use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "artgen", version, about = "Run every job in a prompt file")]
struct Cli {
    /// Prompt file with [subjects], [styles], [prefixes] and [suffixes] sections
    prompt_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "artgen_worker=info,artgen_pipeline=info,artgen_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let Some(source) = cli.prompt_file else {
        eprintln!("{}", Cli::command().render_usage());
        return Ok(());
    };

    let config = WorkerConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        output_root = %config.output_root.display(),
        backend_root = %config.backend_root.display(),
        python = %config.python,
        "Starting artgen",
    );

    let device = Arc::new(DeviceProbe::new(config.device_name.clone()));
    let runner = Arc::new(JobRunner::new(config.runner_config(), device));

    let mut dispatcher = Dispatcher::new(&source, runner);
    dispatcher
        .load()
        .with_context(|| format!("cannot load prompt file {}", source.display()))?;

    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    control::spawn_stdin_reader(control_tx);
    tracing::info!("{COMMAND_HELP}");

    let summary = dispatcher.run(control_rx).await;
    tracing::info!(
        jobs_completed = summary.jobs_completed,
        pending = summary.pending,
        "Worker stopped",
    );

    // The stdin reader may still be blocked on a read; don't wait for it.
    std::process::exit(0);
}
