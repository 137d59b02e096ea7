//! Command-line argument definitions for the memcached loader
//!
//! This module defines the CLI interface using the clap derive API and
//! turns parsed arguments into an immutable [`RunConfig`].

use crate::Result;
use crate::app::models::AppIdPolicy;
use crate::config::RunConfig;
use crate::constants::{
    DEFAULT_BACKOFF_STEP_MS, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_TRIES, DEFAULT_MEMC_TIMEOUT_SECS,
    DEFAULT_PATTERN, DEFAULT_WORKERS, device_types,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the memcached loader
///
/// Loads gzip-compressed device app-install logs into memcached, one
/// memcached server per device type.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "memc-loader",
    version,
    about = "Load gzipped device app-install logs into memcached",
    long_about = "Reads every file matching --pattern, parses tab-separated device install \
                  records, and writes each one to the memcached server configured for its \
                  device type. Loaded files are renamed with a leading dot. The run reports \
                  its error rate in the log; the exit code does not depend on it."
)]
pub struct Args {
    /// Number of line parser workers
    #[arg(
        long = "workers",
        value_name = "COUNT",
        default_value_t = DEFAULT_WORKERS,
        help = "Number of line parser workers"
    )]
    pub workers: usize,

    /// Capacity of the line queue and of each device type's record queue
    #[arg(
        long = "buffer-size",
        value_name = "COUNT",
        default_value_t = DEFAULT_BUFFER_SIZE,
        help = "Queue capacity"
    )]
    pub buffer_size: usize,

    /// Glob selecting the input files
    ///
    /// Files already renamed with a leading dot are excluded by the default pattern.
    #[arg(
        long = "pattern",
        value_name = "GLOB",
        default_value = DEFAULT_PATTERN,
        help = "Filename pattern to load"
    )]
    pub pattern: String,

    /// Write attempts per record before it is counted as an error
    #[arg(
        long = "max-tries",
        value_name = "COUNT",
        default_value_t = DEFAULT_MAX_TRIES,
        help = "Write attempts per record"
    )]
    pub max_tries: u32,

    /// Timeout for every memcached connect and write, in seconds
    #[arg(
        long = "memc-timeout",
        value_name = "SECS",
        default_value_t = DEFAULT_MEMC_TIMEOUT_SECS,
        help = "Memcache timeout in seconds"
    )]
    pub memc_timeout: u64,

    /// Linear backoff step between write attempts, in milliseconds
    #[arg(
        long = "backoff-ms",
        value_name = "MS",
        default_value_t = DEFAULT_BACKOFF_STEP_MS,
        help = "Backoff step between write attempts in milliseconds"
    )]
    pub backoff_ms: u64,

    #[arg(long = "idfa", value_name = "HOST:PORT", default_value = device_types::DEFAULT_IDFA_ADDRESS, help = "idfa devices address")]
    pub idfa: String,

    #[arg(long = "gaid", value_name = "HOST:PORT", default_value = device_types::DEFAULT_GAID_ADDRESS, help = "gaid devices address")]
    pub gaid: String,

    #[arg(long = "adid", value_name = "HOST:PORT", default_value = device_types::DEFAULT_ADID_ADDRESS, help = "adid devices address")]
    pub adid: String,

    #[arg(long = "dvid", value_name = "HOST:PORT", default_value = device_types::DEFAULT_DVID_ADDRESS, help = "dvid devices address")]
    pub dvid: String,

    /// Treatment of app ids that are not integers
    ///
    /// `coerce` stores them as 0, `skip` drops them, `reject` counts the whole line as an error.
    #[arg(
        long = "app-ids",
        value_enum,
        default_value = "coerce",
        help = "How to treat non-integer app ids"
    )]
    pub app_ids: AppIdPolicy,

    /// Parse everything but only log what would be written
    #[arg(
        long = "dry-run",
        alias = "dry",
        help = "Log records instead of writing them; input files are not renamed"
    )]
    pub dry_run: bool,

    /// Append log output to this file instead of stderr
    #[arg(
        short = 'l',
        long = "log",
        value_name = "FILE",
        help = "Write logs to a file"
    )]
    pub log_file: Option<PathBuf>,

    /// Check payload encoding on built-in sample lines and exit
    #[arg(short = 't', long = "test", help = "Run the payload self-check and exit")]
    pub self_test: bool,

    /// Disable the progress bar
    #[arg(long = "no-progress", help = "Disable the progress bar")]
    pub no_progress: bool,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: debug, -vv: trace)"
    )]
    pub verbose: u8,

    /// Suppress output (quiet mode)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Suppress output except errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl Args {
    /// Build the run configuration these arguments describe
    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            workers: self.workers,
            buffer_size: self.buffer_size,
            pattern: self.pattern.clone(),
            max_tries: self.max_tries,
            store_timeout: Duration::from_secs(self.memc_timeout),
            backoff_step: Duration::from_millis(self.backoff_ms),
            dry_run: self.dry_run,
            app_id_policy: self.app_ids,
            device_addresses: Default::default(),
        }
        .with_devices([
            (device_types::IDFA, self.idfa.as_str()),
            (device_types::GAID, self.gaid.as_str()),
            (device_types::ADID, self.adid.as_str()),
            (device_types::DVID, self.dvid.as_str()),
        ])
    }

    /// Validate the arguments for consistency
    pub fn validate(&self) -> Result<RunConfig> {
        let config = self.to_run_config();
        config.validate()?;
        Ok(config)
    }

    /// Get the log level implied by the verbosity flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match (self.verbose, self.dry_run) {
                (0, false) => "info",
                (0, true) | (1, _) => "debug",
                _ => "trace",
            }
        }
    }

    /// Check if we should show the progress bar
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.no_progress && self.log_file.is_none()
    }
}
