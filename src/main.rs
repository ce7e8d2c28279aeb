//! subpipe - video to translated subtitles
//!
//! Entry point: extracts audio with ffmpeg, runs transcription and translation
//! in isolated worker processes, and writes an SRT or SMI file.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subpipe::cli::{Args, Commands, RunArgs};
use subpipe::config::Config;
use subpipe::media::MediaProcessorFactory;
use subpipe::stage::{SubprocessRunner, worker};
use subpipe::workflow::{Workflow, sweep_stale_workspaces};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    match args.command {
        Some(Commands::Worker { stage, store, audio, config, verbose, params }) => {
            setup_worker_logging(verbose);
            let exit = worker::run_worker(config.as_deref(), stage, &store, audio, params).await;
            std::process::exit(exit.code());
        }
        Some(Commands::Clean { config }) => clean(config.as_deref()),
        None => run_pipeline(args.run).await,
    }
}

async fn run_pipeline(run: RunArgs) -> Result<()> {
    let config = Config::load(run.config.as_deref())?;
    setup_logging(run.verbose, &config.pipeline.log_dir())?;

    let settings = run.to_settings(&config)?;
    settings.validate()?;

    if settings.output.exists() && !run.yes && !confirm_overwrite(&settings.output)? {
        println!("Cancelled: {} was left unchanged", settings.output.display());
        return Ok(());
    }

    let media = MediaProcessorFactory::create_processor(config.media.clone());
    media.check_availability().await?;
    info!("Using {}", media.get_version_info().await?);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the current stage");
            let _ = cancel_tx.send(true);
        }
    });

    let runner = SubprocessRunner::current_exe(run.config.clone())?
        .with_verbose(run.verbose)
        .with_cancellation(cancel_rx.clone());
    let mut workflow = Workflow::new(settings, media, Box::new(runner), config.pipeline.work_dir())
        .with_audio_format(config.media.audio_format.clone())
        .with_cancellation(cancel_rx);

    let report = workflow.run().await?;

    if report.untranslated {
        warn!("The subtitle contains untranslated source text");
    }
    println!(
        "Wrote {} cues to {} (language {}, {} empty segments skipped)",
        report.segments,
        report.output.display(),
        report.language,
        report.skipped_blank
    );
    Ok(())
}

fn clean(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    setup_logging(false, &config.pipeline.log_dir())?;

    let work_dir = config.pipeline.work_dir();
    let report = sweep_stale_workspaces(&work_dir)?;
    println!(
        "Removed {} workspaces ({} files, {:.2} MB) from {}",
        report.workspaces,
        report.files,
        report.bytes as f64 / 1024.0 / 1024.0,
        work_dir.display()
    );
    Ok(())
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    print!("{} already exists. Overwrite? [y/N] ", path.display());
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "subpipe.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Workers log to the inherited stderr only; the parent owns the log file.
fn setup_worker_logging(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
}
