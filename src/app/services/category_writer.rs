//! Per-category store writer
//!
//! One [`CategoryWriter`] exists for each configured device type. It owns the
//! store client for that category and drains the category's record queue,
//! writing each record with bounded linear-backoff retry. Records that cannot
//! be written are counted and dropped.

use crate::Result;
use crate::app::models::AppsInstalled;
use crate::app::services::stats::LoadStats;
use crate::app::services::store::AppsStore;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// How many times a write is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_tries: u32,
    /// Wait after the n-th failed attempt is `n * backoff_step`
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Writer bound to one device type and its store
pub struct CategoryWriter<S> {
    device_type: String,
    store: S,
    retry: RetryPolicy,
}

impl<S: AppsStore> CategoryWriter<S> {
    pub fn new(device_type: impl Into<String>, store: S, retry: RetryPolicy) -> Self {
        Self {
            device_type: device_type.into(),
            store,
            retry,
        }
    }

    /// Drain `records` until the queue is closed and empty
    ///
    /// Returns this writer's private counts; only failures are counted here,
    /// lines were already counted by the parser that produced them.
    pub async fn run(mut self, mut records: mpsc::Receiver<AppsInstalled>) -> LoadStats {
        let mut stats = LoadStats::new();
        let mut written = 0usize;

        while let Some(record) = records.recv().await {
            match self.insert(&record).await {
                Ok(()) => written += 1,
                Err(e) => {
                    error!("Cannot write {} to {}: {}", record.key(), self.store.address(), e);
                    stats.record_error();
                }
            }
        }

        debug!(
            "Writer for {} finished: {} written, {} failed",
            self.device_type, written, stats.errors
        );
        stats
    }

    /// Serialize one record and write it, retrying transient failures
    pub async fn insert(&mut self, record: &AppsInstalled) -> Result<()> {
        let packed = record.to_user_apps().encode()?;
        let key = record.key();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.set(&key, &packed).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.max_tries => {
                    let delay = self.retry.delay_after(attempt);
                    debug!(
                        "Write of {} to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        key,
                        self.store.address(),
                        attempt,
                        self.retry.max_tries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
