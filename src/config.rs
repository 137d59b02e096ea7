//! Run configuration and validation.
//!
//! A [`RunConfig`] is built once from the command line, validated, and then
//! only ever read. Stages receive the small pieces they need from it rather
//! than reading any global state.

use crate::app::models::AppIdPolicy;
use crate::app::services::category_writer::RetryPolicy;
use crate::constants::{
    DEFAULT_BACKOFF_STEP_MS, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_TRIES, DEFAULT_MEMC_TIMEOUT_SECS,
    DEFAULT_PATTERN, DEFAULT_WORKERS, MAX_WORKERS, device_types,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// Immutable settings for one load run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of line parser workers
    pub workers: usize,

    /// Capacity of the shared line queue and of every category queue
    pub buffer_size: usize,

    /// Glob selecting the input files
    pub pattern: String,

    /// Write attempts per record before it is counted as an error
    pub max_tries: u32,

    /// Timeout applied to every store connect and write
    pub store_timeout: Duration,

    /// Linear backoff step; the n-th retry waits `n * backoff_step`
    pub backoff_step: Duration,

    /// Log records instead of writing them, and leave input files in place
    pub dry_run: bool,

    /// How unparsable app-id tokens are treated
    pub app_id_policy: AppIdPolicy,

    /// Device type → store address (`host:port`); the keys are the only valid categories
    pub device_addresses: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let device_addresses = [
            (device_types::IDFA, device_types::DEFAULT_IDFA_ADDRESS),
            (device_types::GAID, device_types::DEFAULT_GAID_ADDRESS),
            (device_types::ADID, device_types::DEFAULT_ADID_ADDRESS),
            (device_types::DVID, device_types::DEFAULT_DVID_ADDRESS),
        ]
        .into_iter()
        .map(|(device, address)| (device.to_string(), address.to_string()))
        .collect();

        Self {
            workers: DEFAULT_WORKERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            pattern: DEFAULT_PATTERN.to_string(),
            max_tries: DEFAULT_MAX_TRIES,
            store_timeout: Duration::from_secs(DEFAULT_MEMC_TIMEOUT_SECS),
            backoff_step: Duration::from_millis(DEFAULT_BACKOFF_STEP_MS),
            dry_run: false,
            app_id_policy: AppIdPolicy::default(),
            device_addresses,
        }
    }
}

impl RunConfig {
    /// Create a configuration with default settings for the given pattern
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Replace the device type → address mapping
    pub fn with_devices<I, K, V>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.device_addresses = devices
            .into_iter()
            .map(|(device, address)| (device.into(), address.into()))
            .collect();
        self
    }

    /// Retry settings handed to each category writer
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries,
            backoff_step: self.backoff_step,
        }
    }

    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::configuration(
                "Number of workers must be greater than 0",
            ));
        }

        if self.workers > MAX_WORKERS {
            return Err(Error::configuration(format!(
                "Number of workers cannot exceed {}",
                MAX_WORKERS
            )));
        }

        if self.buffer_size == 0 {
            return Err(Error::configuration("Buffer size must be greater than 0"));
        }

        if self.max_tries == 0 {
            return Err(Error::configuration("Max tries must be greater than 0"));
        }

        if self.store_timeout.is_zero() {
            return Err(Error::configuration(
                "Memcache timeout must be greater than 0",
            ));
        }

        if self.pattern.trim().is_empty() {
            return Err(Error::configuration("File pattern cannot be empty"));
        }

        if self.device_addresses.is_empty() {
            return Err(Error::configuration(
                "At least one device type must have a memcache address",
            ));
        }

        for (device_type, address) in &self.device_addresses {
            if device_type.is_empty() {
                return Err(Error::configuration("Device type names cannot be empty"));
            }
            validate_address(device_type, address)?;
        }

        Ok(())
    }
}

/// Check that an address has the `host:port` shape
fn validate_address(device_type: &str, address: &str) -> Result<()> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(Error::configuration(format!(
            "Address for {} must be host:port, got '{}'",
            device_type, address
        )));
    };

    if host.is_empty() {
        return Err(Error::configuration(format!(
            "Address for {} has an empty host: '{}'",
            device_type, address
        )));
    }

    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(Error::configuration(format!(
            "Address for {} has an invalid port: '{}'",
            device_type, address
        ))),
    }
}
