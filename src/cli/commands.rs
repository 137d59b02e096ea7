//! Command implementation for the memcached loader CLI
//!
//! This module contains logging setup, the load command itself, the payload
//! self-check, and the end-of-run summary.

use crate::app::models::{AppsInstalled, UserApps};
use crate::app::services::pipeline::{LoadPipeline, LoadReport};
use crate::app::services::store::{DryRunStore, MemcacheStore};
use crate::cli::args::Args;
use crate::config::RunConfig;
use crate::constants::{NORMAL_ERR_RATE, SELF_TEST_SAMPLE};
use crate::{Error, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Timestamps as `2024.01.31 23:59:59`, local time
struct LogTimer;

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", chrono::Local::now().format("%Y.%m.%d %H:%M:%S"))
    }
}

/// Main command runner
///
/// 1. Set up logging
/// 2. Run the self-check, if asked, and stop
/// 3. Build and validate the run configuration
/// 4. Run the load and print a summary
///
/// The returned report is `None` after a self-check.
pub async fn run(args: Args) -> Result<Option<LoadReport>> {
    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    if args.self_test {
        let checked = run_self_test()?;
        info!("Payload self-check passed on {} sample lines", checked);
        return Ok(None);
    }

    let config = args.validate()?;
    info!("Memc loader started with options: {:?}", config);

    let progress = args.show_progress().then(create_progress_bar);
    let report = execute(&config, progress).await?;

    if !args.quiet {
        print_summary(&report);
    }
    Ok(Some(report))
}

/// Run one load with real memcached clients, or dry-run stores
pub async fn execute(config: &RunConfig, progress: Option<ProgressBar>) -> Result<LoadReport> {
    let mut pipeline = LoadPipeline::new(config);
    if let Some(pb) = progress {
        pipeline = pipeline.with_progress(pb);
    }

    if config.dry_run {
        pipeline
            .run(|_device_type, address| DryRunStore::new(address))
            .await
    } else {
        let timeout = config.store_timeout;
        pipeline
            .run(|_device_type, address| MemcacheStore::new(address, timeout))
            .await
    }
}

/// Encode and decode the built-in sample lines, checking nothing is lost
pub fn run_self_test() -> Result<usize> {
    for line in SELF_TEST_SAMPLE {
        let record = AppsInstalled::parse(line).map_err(|e| Error::line_parse(*line, e))?;
        let payload = record.to_user_apps();
        let unpacked = UserApps::decode(&payload.encode()?)?;

        if unpacked != payload {
            return Err(Error::configuration(format!(
                "Payload round trip changed {}: {:?} != {:?}",
                record.key(),
                unpacked,
                payload
            )));
        }
        debug!("{} -> {:?}", record.key(), unpacked);
    }
    Ok(SELF_TEST_SAMPLE.len())
}

/// Set up structured logging to stderr or to the `--log` file
pub fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();

    // Create filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memc_loader={}", log_level)));

    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(format!("Cannot open log file {}", path.display()), e))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_ansi(false)
                    .with_timer(LogTimer)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(LogTimer)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Create a progress bar counting finished input files
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Print a coloured end-of-run summary to stdout
pub fn print_summary(report: &LoadReport) {
    println!("\n{}", "Load Summary".bright_green().bold());
    println!(
        "  {} {:.2}s",
        "Time elapsed:".bright_cyan(),
        report.elapsed.as_secs_f64()
    );
    println!(
        "  {} {}",
        "Files:".bright_cyan(),
        report.files.len().to_string().bright_white()
    );

    let failed: Vec<_> = report.failed_files().collect();
    if !failed.is_empty() {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            failed.len().to_string().bright_red().bold()
        );
        for file in failed {
            println!("    {}", file.path.display().to_string().red());
        }
    }

    println!(
        "  {} {}",
        "Lines processed:".bright_cyan(),
        report.stats.total.to_string().bright_white().bold()
    );
    println!(
        "  {} {}",
        "Errors:".bright_cyan(),
        report.stats.errors.to_string().bright_white()
    );

    let rate = format!("{:.4}", report.error_rate());
    if report.is_successful() {
        println!(
            "  {} {} {}",
            "Error rate:".bright_cyan(),
            rate.bright_green(),
            "(successful load)".green()
        );
    } else {
        println!(
            "  {} {} {}",
            "Error rate:".bright_cyan(),
            rate.bright_red().bold(),
            format!("(above {}, failed load)", NORMAL_ERR_RATE).red()
        );
    }
}
