//! VidCleanser - Corner Watermark Removal Service
//!
//! Entry point: loads the configuration, sets up logging and dispatches the
//! watch, process, status, validate and init-config commands.

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vidcleanser::cli::{Args, Commands};
use vidcleanser::config::{Config, CornerMode};
use vidcleanser::job::JobOutcome;
use vidcleanser::processor::VideoProcessor;
use vidcleanser::setup::SetupManager;
use vidcleanser::status::{StatusBoard, StatusSnapshot};
use vidcleanser::watch::WatchService;

/// A running watcher refreshes the status file every second
const STALE_STATUS_SECS: i64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    setup_logging(args.verbose, &config)?;

    match args.command {
        Commands::Watch { skip_validation } => {
            info!("Starting VidCleanser watcher");
            let processor = VideoProcessor::from_config(config.clone(), StatusBoard::new())?;

            let setup = SetupManager::new(config);
            if skip_validation {
                setup.ensure_directories()?;
            } else {
                let report = setup.initialize(processor.media().as_ref(), processor.inpaint().as_ref()).await?;
                info!("Environment:\n{}", report.render());
            }

            let cancel = shutdown_token();
            let service = WatchService::new(Arc::new(processor));
            service.run(cancel).await?;
        }
        Commands::Process { input, corners } => {
            if let Some(corners) = corners {
                config.mask.corners = corners.parse::<CornerMode>()?;
            }
            info!("Processing video file: {}", input.display());

            SetupManager::new(config.clone()).ensure_directories()?;
            let processor = VideoProcessor::from_config(config, StatusBoard::new())?.with_progress(true);

            let cancel = shutdown_token();
            match processor.process(&input, &cancel).await {
                JobOutcome::Succeeded { output } => {
                    println!("Cleaned video written to {}", output.display());
                }
                JobOutcome::Failed { stage, reason, .. } => {
                    bail!("Processing {} failed during {}: {}", input.display(), stage, reason);
                }
            }
        }
        Commands::Status { json } => {
            let snapshot = StatusSnapshot::read_from(&config.status_file())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", snapshot.render());
                let age = chrono::Utc::now().signed_duration_since(snapshot.updated_at).num_seconds();
                if snapshot.running && age > STALE_STATUS_SECS {
                    println!("Warning: status last updated {}s ago, the watcher may have exited", age);
                }
            }
        }
        Commands::Validate => {
            let processor = VideoProcessor::from_config(config.clone(), StatusBoard::new())?;
            let report = SetupManager::new(config)
                .with_progress(true)
                .validate_environment(processor.media().as_ref(), processor.inpaint().as_ref())
                .await;

            println!("{}", report.render());
            if !report.is_ok() {
                bail!("{} environment check(s) failed", report.failures().len());
            }
            println!("Environment is ready");
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Default configuration written to {}", output.display());
        }
    }

    Ok(())
}

/// Cancelled on Ctrl-C so the active job can clean up before exit
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
    cancel
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, config: &Config) -> Result<()> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "vidcleanser.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse::<Level>()
            .map_err(|e| anyhow!("Invalid log level '{}': {}", config.logging.level, e))?
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("vidcleanser.log").display()
    );

    Ok(())
}
