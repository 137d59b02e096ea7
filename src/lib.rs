//! Memcached Loader Library
//!
//! A Rust library for bulk-loading "installed applications per device" logs
//! into a set of memcached servers, one server per device type.
//!
//! This library provides tools for:
//! - Reading gzip-compressed tab-separated input files concurrently
//! - Parsing lines into device install records with configurable app-id tolerance
//! - Routing records to a dedicated writer per device type
//! - Writing compact binary payloads with bounded linear-backoff retry
//! - Aggregating per-worker statistics into a run-level error rate

pub mod config;
pub mod constants;

// Core application modules
pub mod app {
    pub mod models;
    pub mod services {
        pub mod category_writer;
        pub mod file_reader;
        pub mod line_parser;
        pub mod pipeline;
        pub mod stats;
        pub mod store;
    }
}

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use app::models::{AppIdPolicy, AppsInstalled, ParseError, UserApps};
pub use app::services::pipeline::{LoadPipeline, LoadReport};
pub use app::services::stats::LoadStats;
pub use app::services::store::{AppsStore, DryRunStore, MemcacheStore};
pub use config::RunConfig;

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for the memcached loader
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for loader operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Input file could not be opened
    #[error("Unable to open file '{}': {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Gzip stream could not be decoded
    #[error("Unable to decompress file '{}': {source}", path.display())]
    Decompression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input file pattern is not a valid glob
    #[error("Cannot process files matching '{pattern}': {source}")]
    GlobPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Payload could not be encoded or decoded
    #[error("Unable to serialize payload: {source}")]
    Serialization {
        #[source]
        source: postcard::Error,
    },

    /// Connection to a store could not be established
    #[error("Cannot connect to memcache {address}: {source}")]
    StoreConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Store rejected or failed a write
    #[error("Cannot write to memcache {address}: {message}")]
    StoreWrite { address: String, message: String },

    /// Store did not answer within its timeout
    #[error("Memcache {address} timed out after {timeout:?}")]
    StoreTimeout { address: String, timeout: Duration },

    /// Key cannot be sent to the store
    #[error("Invalid memcache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Line could not be parsed into a record
    #[error("Cannot parse line '{line}': {source}")]
    LineParse {
        line: String,
        #[source]
        source: ParseError,
    },

    /// Record has a device type with no configured store
    #[error("Unknown device type: {device_type}")]
    UnknownCategory { device_type: String },

    /// Category writer stopped before its queue was closed
    #[error("Record queue for {device_type} is closed")]
    QueueClosed { device_type: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a file open error
    pub fn file_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a decompression error
    pub fn decompression(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Decompression {
            path: path.into(),
            source,
        }
    }

    /// Create a glob pattern error
    pub fn glob_pattern(pattern: impl Into<String>, source: glob::PatternError) -> Self {
        Self::GlobPattern {
            pattern: pattern.into(),
            source,
        }
    }

    /// Create a store connection error
    pub fn store_connect(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::StoreConnect {
            address: address.into(),
            source,
        }
    }

    /// Create a store write error
    pub fn store_write(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a store timeout error
    pub fn store_timeout(address: impl Into<String>, timeout: Duration) -> Self {
        Self::StoreTimeout {
            address: address.into(),
            timeout,
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a line parse error
    pub fn line_parse(line: impl Into<String>, source: ParseError) -> Self {
        Self::LineParse {
            line: line.into(),
            source,
        }
    }

    /// Create an unknown category error
    pub fn unknown_category(device_type: impl Into<String>) -> Self {
        Self::UnknownCategory {
            device_type: device_type.into(),
        }
    }

    /// Create a queue closed error
    pub fn queue_closed(device_type: impl Into<String>) -> Self {
        Self::QueueClosed {
            device_type: device_type.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether another write attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::StoreConnect { .. }
                | Self::StoreWrite { .. }
                | Self::StoreTimeout { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: "I/O operation failed".to_string(),
            source: error,
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(error: postcard::Error) -> Self {
        Self::Serialization { source: error }
    }
}
