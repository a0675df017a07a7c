//! Revoice - resumable subtitle-to-dub pipeline
//!
//! Entry point: argument parsing, logging and configuration, then one of the
//! subcommands.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use revoice::cli::{Args, Commands, RunOverrides};
use revoice::config::Config;
use revoice::engine::{CommandSynthesizer, EngineFactory};
use revoice::fitter::DurationFitter;
use revoice::job::{load_manifest, JobSource};
use revoice::lock::{find_locked_directories, LockCoordinator};
use revoice::pipeline::StagePipeline;
use revoice::runner::JobRunner;
use revoice::speaker::{calibrate, write_speed_table, SpeakerTable};

const DEFAULT_CONFIG_FILE: &str = "revoice.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    // Explicit path, then ./revoice.toml, then defaults
    let (config, config_dir) = match &args.config {
        Some(path) => (Config::from_file(path)?, parent_dir(path)),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
            (Config::from_file(DEFAULT_CONFIG_FILE)?, std::env::current_dir()?)
        }
        None => (Config::default(), std::env::current_dir()?),
    };

    match args.command {
        Commands::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }

        Commands::Locks { input, recover } => {
            show_locks(&config, &input, recover)?;
        }

        Commands::Calibrate {
            speaker,
            output,
            work_dir,
        } => {
            let speakers = SpeakerTable::from_config(&config.speakers, &config_dir)?;
            let voice = speakers
                .get(&speaker)
                .with_context(|| format!("Unknown speaker '{}'", speaker))?;
            let work_dir = work_dir.unwrap_or_else(|| parent_dir(&output).join(format!("{}_calibration", speaker)));
            let synthesizer = CommandSynthesizer::new(config.synthesizer.clone());

            let points = calibrate(&synthesizer, voice, &config.job.target_language, &work_dir).await?;
            write_speed_table(&output, &points)?;
            println!("Wrote {} calibration points to {}", points.len(), output.display());
        }

        Commands::Run {
            input,
            manifest,
            overrides,
        } => {
            let failed = run(config, &config_dir, input, manifest, &overrides).await?;
            if failed > 0 {
                anyhow::bail!("{} job(s) failed", failed);
            }
        }
    }

    Ok(())
}

async fn run(
    mut config: Config,
    config_dir: &Path,
    input: Option<PathBuf>,
    manifest: Option<PathBuf>,
    overrides: &RunOverrides,
) -> Result<usize> {
    overrides.apply(&mut config);
    config.validate()?;

    let speakers = Arc::new(SpeakerTable::from_config(&config.speakers, config_dir)?);
    let engines = EngineFactory::create(&config)?;
    engines.media.check_availability()?;

    let source = JobSource::new(config.job.clone(), speakers);
    let subtitles = match (&manifest, &input) {
        (Some(manifest), _) => load_manifest(manifest)?,
        (None, Some(input)) => source.discover(input)?,
        (None, None) => anyhow::bail!("Either --input or --manifest is required"),
    };
    let candidates = source.candidates(&subtitles)?;

    let coordinator = LockCoordinator::from_config(&config.lock);
    info!(
        "Worker {} starting {} job(s), lock timeout {:?}, heartbeat {:?}",
        coordinator.worker_id(),
        candidates.len(),
        coordinator.stale_timeout(),
        coordinator.heartbeat_interval()
    );

    let pipeline = StagePipeline::new(engines, DurationFitter::from_config(&config.fitter))
        .with_progress(!overrides.no_progress);
    let runner = JobRunner::new(coordinator, pipeline);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after releasing the current lock");
            on_signal.cancel();
        }
    });

    let summary = runner.run_batch(&candidates, &cancel).await;

    println!("\nBatch summary:");
    println!("  completed:     {}", summary.completed);
    println!("  already done:  {}", summary.already_done);
    println!("  busy:          {}", summary.busy);
    println!("  missing video: {}", summary.missing_video);
    println!("  failed:        {}", summary.failed.len());
    for (subtitle, reason) in &summary.failed {
        println!("    {}: {}", subtitle.display(), reason);
    }
    if summary.interrupted {
        println!("  (interrupted)");
    }

    Ok(summary.failed.len())
}

fn show_locks(config: &Config, input: &Path, recover: bool) -> Result<()> {
    let coordinator = LockCoordinator::from_config(&config.lock);
    let directories = find_locked_directories(input);
    if directories.is_empty() {
        println!("No locks under {}", input.display());
        return Ok(());
    }

    println!("{:<12} {:<24} {:>8}  {}", "State", "Worker", "Age (s)", "Directory");
    println!("{}", "-".repeat(72));
    for directory in directories {
        let Some(status) = coordinator.inspect(&directory)? else {
            continue;
        };
        let worker = status
            .record
            .as_ref()
            .map(|r| r.worker_id.clone())
            .unwrap_or_else(|| "?".to_string());
        let state = match (status.stale, recover) {
            (true, true) if coordinator.recover_if_stale(&directory)? => "recovered",
            (true, _) => "stale",
            (false, _) => "live",
        };
        println!(
            "{:<12} {:<24} {:>8.0}  {}",
            state,
            worker,
            status.age.as_secs_f64(),
            directory.display()
        );
    }
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".revoice").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // File appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "revoice.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("revoice.log").display()
    );

    Ok(())
}
