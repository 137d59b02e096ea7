//! Application constants for the memcached loader
//!
//! This module contains default values, limits and protocol constants
//! used throughout the loader.

// =============================================================================
// Input Files
// =============================================================================

/// Default glob for input files; dot-prefixed (already processed) files are skipped
pub const DEFAULT_PATTERN: &str = "data/[!.]*.tsv.gz";

/// Prefix added to a file name once it has been loaded
pub const PROCESSED_FILE_PREFIX: &str = ".";

/// Field delimiter within a line
pub const FIELD_DELIMITER: char = '\t';

/// Delimiter between app ids in the last field
pub const APP_ID_DELIMITER: char = ',';

/// Minimum number of tab-separated fields in a valid line
pub const MIN_LINE_FIELDS: usize = 5;

// =============================================================================
// Pipeline Defaults
// =============================================================================

/// Default number of line parser workers
pub const DEFAULT_WORKERS: usize = 10;

/// Default capacity of the line queue and every category queue
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// Default number of write attempts per record
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default per-call store timeout in seconds
pub const DEFAULT_MEMC_TIMEOUT_SECS: u64 = 10;

/// Default linear backoff step between write attempts in milliseconds
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 100;

/// Upper bound on parser workers accepted from the command line
pub const MAX_WORKERS: usize = 1024;

/// Error rate above which a load is reported as failed
pub const NORMAL_ERR_RATE: f64 = 0.01;

// =============================================================================
// Device Types
// =============================================================================

/// Device types with a dedicated store, and their default addresses
pub mod device_types {
    pub const IDFA: &str = "idfa";
    pub const GAID: &str = "gaid";
    pub const ADID: &str = "adid";
    pub const DVID: &str = "dvid";

    pub const DEFAULT_IDFA_ADDRESS: &str = "127.0.0.1:33013";
    pub const DEFAULT_GAID_ADDRESS: &str = "127.0.0.1:33014";
    pub const DEFAULT_ADID_ADDRESS: &str = "127.0.0.1:33015";
    pub const DEFAULT_DVID_ADDRESS: &str = "127.0.0.1:33016";
}

// =============================================================================
// Memcached Protocol
// =============================================================================

/// Memcached text protocol limits and replies
pub mod memcache {
    /// Longest key memcached accepts
    pub const MAX_KEY_LENGTH: usize = 250;

    /// Reply to a successful storage command
    pub const STORED: &str = "STORED";

    /// Line terminator
    pub const CRLF: &str = "\r\n";
}

/// Sample lines used by the payload self-check
pub const SELF_TEST_SAMPLE: &[&str] = &[
    "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23",
    "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
];
