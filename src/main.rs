//! # Profile Harvester
//!
//! Harvests public professional profiles by orchestrating an external
//! browser-automation worker and exporting the results as one flat CSV.
//!
//! ## Features
//!
//! - Reads a list of profile URLs, one per line, and rejects foreign hosts
//! - Ensures an authenticated session through the worker before scraping
//! - Scrapes one profile sequentially, or many in a single multi-tab worker call
//! - Joins out-of-order worker rows back to their targets by profile URL
//! - Normalizes every row onto a fixed schema and writes it atomically to CSV
//!
//! ## Usage
//!
//! ```sh
//! LINKEDIN_EMAIL=me@example.com LINKEDIN_PASSWORD=... profile_harvester urls.txt -o out.csv
//! ```
//!
//! ## Architecture
//!
//! 1. **Preflight**: check the worker runtime can be started
//! 2. **Session**: verify the stored session or run an interactive login
//! 3. **Scraping**: one worker invocation for the whole (capped) target list
//! 4. **Export**: normalized rows are written to the output CSV

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as tfmt};

mod cli;
mod config;
mod coordinator;
mod error;
mod models;
mod normalize;
mod outputs;
mod session;
mod targets;
mod utils;
mod worker;

use cli::Cli;
use config::Settings;
use coordinator::{CoordinatorOptions, ScrapeCoordinator};
use session::{FileSessionStore, SessionManager};
use targets::load_targets;
use worker::ProcessWorker;

const LOG_FILE: &str = "scraper.log";

/// Console logging, plus a plain-text log file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop and must outlive the run.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let filter = || {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    };

    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339())
        .with_filter(filter());

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tfmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // Config errors are reported after tracing is up, so load first and log later.
    let loaded = Settings::load(args.config.as_deref()).await;
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| loaded.as_ref().ok().and_then(|s| s.log_dir.clone()));

    let _guard = match init_tracing(args.verbose, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        outcome = run(args, settings) => match outcome {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "Run failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; stopping worker");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli, mut settings: Settings) -> Result<ExitCode, Box<dyn Error>> {
    let start_time = Instant::now();
    settings.apply_cli(&args);
    debug!(?settings, "Effective settings");

    let targets = match load_targets(&args.input_file, &settings.expected_host).await {
        Ok(targets) if targets.is_empty() => {
            error!(path = %args.input_file.display(), "No valid profile URLs found");
            return Ok(ExitCode::FAILURE);
        }
        Ok(targets) => targets,
        Err(e) => {
            error!(error = %e, "Could not read profile URL file");
            return Ok(ExitCode::FAILURE);
        }
    };

    let worker = ProcessWorker::from_settings(&settings);
    if let Err(e) = worker.preflight(settings.preflight_timeout()).await {
        error!(
            program = worker.program(),
            error = %e,
            "Worker runtime is not available; install it or set worker_program in the config"
        );
        return Ok(ExitCode::FAILURE);
    }

    let planned = settings
        .max_profiles
        .map_or(targets.len(), |max| max.min(targets.len()));
    if args.test {
        info!(limit = settings.test_mode_limit, "Test mode enabled");
    }
    info!("Profile harvester starting");
    info!("Phase 1: login (visible browser if interaction is needed)");
    info!(count = planned, headless = settings.headless, "Phase 2: scraping profiles");
    if planned > 1 {
        info!(max_tabs = settings.max_tabs, "Multi-tab mode: profiles are scraped in parallel tabs");
    }
    info!(path = %settings.output_path.display(), "Phase 3: export to CSV");

    let env = settings.worker_env(&args);
    let store = FileSessionStore::new(&settings.session_file);
    debug!(session_file = %store.path().display(), "Session token location");
    let session = SessionManager::new(store, env.clone());
    let options = CoordinatorOptions {
        max_tabs: settings.max_tabs,
        allow_anonymous: settings.allow_anonymous,
        output: Some(settings.output_path.clone()),
    };

    let mut coordinator = ScrapeCoordinator::new(worker, session, env, options);
    let report = coordinator.run(targets, settings.max_profiles).await?;

    let elapsed = start_time.elapsed();
    let code = match &report.exported {
        Some(path) => {
            info!(
                path = %path.display(),
                total = report.records.len(),
                successful = report.records.successful(),
                failed = report.records.failed(),
                "Scraping complete"
            );
            ExitCode::SUCCESS
        }
        None => {
            error!(state = %coordinator.state(), "No data was scraped");
            ExitCode::FAILURE
        }
    };
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(code)
}
