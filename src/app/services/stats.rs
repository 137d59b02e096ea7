//! Load statistics for the ingestion pipeline
//!
//! Every worker owns a private [`LoadStats`] and hands it back exactly once
//! when it finishes. The coordinator folds them together with
//! [`LoadStats::merge`], so no counter is ever shared between tasks.

use crate::constants::NORMAL_ERR_RATE;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Attempted and failed line counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Lines taken off the line queue
    pub total: usize,
    /// Lines that failed to parse, route, or write
    pub errors: usize,
}

impl LoadStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempted line
    pub fn record_line(&mut self) {
        self.total += 1;
    }

    /// Count one failure
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Add another worker's counts into this one
    pub fn merge(&mut self, other: &LoadStats) {
        self.total += other.total;
        self.errors += other.errors;
    }

    /// Fraction of lines that failed, 0 when nothing was attempted
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.errors as f64 / self.total as f64
        }
    }

    /// Whether the error rate stays within `threshold`
    pub fn is_acceptable(&self, threshold: f64) -> bool {
        self.error_rate() <= threshold
    }

    /// Whether the error rate stays within the normal load threshold
    pub fn is_successful(&self) -> bool {
        self.is_acceptable(NORMAL_ERR_RATE)
    }

    /// Get summary of the counts for logging
    pub fn summary(&self) -> String {
        format!(
            "{} lines, {} errors ({:.4} error rate)",
            self.total,
            self.errors,
            self.error_rate()
        )
    }
}

impl Add for LoadStats {
    type Output = LoadStats;

    fn add(mut self, rhs: LoadStats) -> LoadStats {
        self.merge(&rhs);
        self
    }
}

impl AddAssign for LoadStats {
    fn add_assign(&mut self, rhs: LoadStats) {
        self.merge(&rhs);
    }
}

impl Sum for LoadStats {
    fn sum<I: Iterator<Item = LoadStats>>(iter: I) -> Self {
        iter.fold(LoadStats::new(), Add::add)
    }
}
