//! Load run coordinator
//!
//! [`LoadPipeline`] wires the whole run together:
//!
//! 1. **Init**: resolve input files, create the queues, start parser and writer workers
//! 2. **Running**: start one reader per file and wait for all of them
//! 3. **Draining**: close the line queue, join the parsers, then close the
//!    category queues and join the writers
//! 4. **Aggregating**: merge every worker's counts
//! 5. **Reporting**: log the error rate against the acceptable threshold
//! 6. **Done**: mark loaded files as processed by renaming them
//!
//! Category queues are only closed after every parser has returned, so no
//! record can be in flight towards a writer that was told to stop.

use crate::app::services::category_writer::CategoryWriter;
use crate::app::services::file_reader::{FileReport, read_file};
use crate::app::services::line_parser::{CategoryRoutes, LineParser, SharedLines};
use crate::app::services::stats::LoadStats;
use crate::app::services::store::AppsStore;
use crate::config::RunConfig;
use crate::constants::{NORMAL_ERR_RATE, PROCESSED_FILE_PREFIX};
use crate::{Error, Result};

use futures::future::join_all;
use indicatif::ProgressBar;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Stages of a load run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunPhase {
    Init,
    Running,
    Draining,
    Aggregating,
    Reporting,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of a completed load run
#[derive(Debug)]
pub struct LoadReport {
    /// Merged counts of every parser and writer
    pub stats: LoadStats,
    /// One entry per input file, in discovery order
    pub files: Vec<FileReport>,
    /// Files renamed as processed
    pub files_renamed: usize,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn error_rate(&self) -> f64 {
        self.stats.error_rate()
    }

    /// Whether the error rate is within the acceptable threshold
    pub fn is_successful(&self) -> bool {
        self.stats.is_successful()
    }

    /// Files that could not be read to the end
    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.is_complete())
    }
}

/// Coordinator for one load run
pub struct LoadPipeline<'a> {
    config: &'a RunConfig,
    progress: Option<ProgressBar>,
    phase: RunPhase,
}

impl<'a> LoadPipeline<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            progress: None,
            phase: RunPhase::Init,
        }
    }

    /// Tick `progress` once per finished input file
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Current stage of the run
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        debug_assert!(phase >= self.phase, "run phases only move forward");
        debug!("Load run: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Run the load, creating one store per device type with `connect(device_type, address)`
    ///
    /// Fails only when the input pattern itself is invalid; every other
    /// failure is counted in the returned report.
    pub async fn run<S, F>(&mut self, mut connect: F) -> Result<LoadReport>
    where
        S: AppsStore + 'static,
        F: FnMut(&str, &str) -> S,
    {
        let started = Instant::now();
        let config = self.config;

        // Init
        self.enter(RunPhase::Init);
        let files = discover_files(&config.pattern)?;
        info!(
            "Found {} files matching {}",
            files.len(),
            config.pattern
        );

        let (line_tx, line_rx) = mpsc::channel::<String>(config.buffer_size);
        let shared_lines: SharedLines = Arc::new(Mutex::new(line_rx));

        let retry = config.retry_policy();
        let mut routes = CategoryRoutes::new();
        let mut writers = Vec::with_capacity(config.device_addresses.len());
        for (device_type, address) in &config.device_addresses {
            let (record_tx, record_rx) = mpsc::channel(config.buffer_size);
            routes.insert(device_type.clone(), record_tx);

            let store = connect(device_type.as_str(), address.as_str());
            let writer = CategoryWriter::new(device_type, store, retry);
            writers.push(tokio::spawn(writer.run(record_rx)));
        }
        let routes = Arc::new(routes);

        let parsers: Vec<JoinHandle<LoadStats>> = (0..config.workers)
            .map(|worker_id| {
                let parser = LineParser::new(
                    worker_id,
                    shared_lines.clone(),
                    routes.clone(),
                    config.app_id_policy,
                );
                tokio::spawn(parser.run())
            })
            .collect();
        drop(shared_lines);

        // Running
        self.enter(RunPhase::Running);
        if let Some(pb) = &self.progress {
            pb.set_length(files.len() as u64);
        }
        let readers: Vec<_> = files
            .iter()
            .map(|path| {
                let lines = line_tx.clone();
                let path = path.clone();
                let progress = self.progress.clone();
                tokio::spawn(async move {
                    let report = read_file(path, lines).await;
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    report
                })
            })
            .collect();

        let mut file_reports = Vec::with_capacity(files.len());
        for (path, joined) in files.iter().zip(join_all(readers).await) {
            match joined {
                Ok(report) => file_reports.push(report),
                Err(e) => {
                    error!("Reader for {} panicked: {}", path.display(), e);
                    file_reports.push(FileReport {
                        path: path.clone(),
                        lines: 0,
                        invalid_lines: 0,
                        opened: false,
                        error: Some(Error::io(
                            format!("Reader for {} panicked", path.display()),
                            std::io::Error::other(e.to_string()),
                        )),
                    });
                }
            }
        }

        // Draining: line queue first, then the category queues
        self.enter(RunPhase::Draining);
        drop(line_tx);
        let parser_stats = collect_stats("parser", join_all(parsers).await);
        drop(routes);
        let writer_stats = collect_stats("writer", join_all(writers).await);

        // Aggregating
        self.enter(RunPhase::Aggregating);
        let mut stats = LoadStats::new();
        for worker in parser_stats.iter().chain(writer_stats.iter()) {
            stats.merge(worker);
        }
        // Undecodable lines never reached a parser
        for report in &file_reports {
            stats.merge(&LoadStats {
                total: report.invalid_lines,
                errors: report.invalid_lines,
            });
        }

        // Reporting
        self.enter(RunPhase::Reporting);
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!("{} lines", stats.total));
        }
        report_result(&stats);

        // Done
        self.enter(RunPhase::Done);
        let files_renamed = if config.dry_run {
            debug!("Dry run, leaving input files in place");
            0
        } else {
            file_reports
                .iter()
                .filter(|report| report.opened)
                .filter(|report| dot_rename(&report.path).is_ok())
                .count()
        };

        Ok(LoadReport {
            stats,
            files: file_reports,
            files_renamed,
            elapsed: started.elapsed(),
        })
    }
}

/// Resolve the input pattern to a sorted list of files
pub fn discover_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| Error::glob_pattern(pattern, e))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(path) => debug!("Skipping non-file match {}", path.display()),
            Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();
    Ok(files)
}

/// Rename `path` to `.<name>` in the same directory
pub fn dot_rename(path: &Path) -> Result<PathBuf> {
    let Some(name) = path.file_name() else {
        warn!("Can't rename a file without a name: {}", path.display());
        return Err(Error::configuration(format!(
            "No file name in {}",
            path.display()
        )));
    };

    let mut renamed = std::ffi::OsString::from(PROCESSED_FILE_PREFIX);
    renamed.push(name);
    let target = path.with_file_name(renamed);

    match std::fs::rename(path, &target) {
        Ok(()) => {
            debug!("Renamed {} to {}", path.display(), target.display());
            Ok(target)
        }
        Err(e) => {
            warn!("Can't rename a file: {}: {}", path.display(), e);
            Err(Error::io(format!("Can't rename {}", path.display()), e))
        }
    }
}

/// Log the pass/fail line for a finished run
pub fn report_result(stats: &LoadStats) {
    let rate = stats.error_rate();
    if stats.total == 0 {
        warn!("No lines were processed. Is the file pattern right?");
    }

    if stats.is_successful() {
        info!("Acceptable error rate ({}). Successful load", rate);
    } else {
        error!(
            "High error rate ({} > {}). Failed load",
            rate, NORMAL_ERR_RATE
        );
    }
    info!("Processed count: {}", stats.total);
}

fn collect_stats(
    stage: &str,
    joined: Vec<std::result::Result<LoadStats, JoinError>>,
) -> Vec<LoadStats> {
    joined
        .into_iter()
        .enumerate()
        .filter_map(|(worker_id, result)| match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("{} worker {} failed: {}", stage, worker_id, e);
                None
            }
        })
        .collect()
}
