//! Gzip input file reader
//!
//! Each input file gets its own reader. The reader decompresses the file on
//! the blocking thread pool and pushes every trimmed, non-empty line onto the
//! shared line queue, blocking while the queue is full. Lines that are not
//! valid UTF-8 are counted on the report instead of being sent. A file that
//! cannot be opened or decoded stops producing lines; other files are
//! unaffected.

use crate::Error;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Outcome of reading one input file
#[derive(Debug)]
pub struct FileReport {
    /// File that was read
    pub path: PathBuf,
    /// Lines pushed onto the line queue
    pub lines: usize,
    /// Non-empty lines dropped because they are not valid UTF-8
    pub invalid_lines: usize,
    /// Whether the file itself could be opened
    pub opened: bool,
    /// Why reading stopped early, if it did
    pub error: Option<Error>,
}

impl FileReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: 0,
            invalid_lines: 0,
            opened: false,
            error: None,
        }
    }

    fn failed(mut self, err: Error) -> Self {
        error!("{}", err);
        self.error = Some(err);
        self
    }

    /// Whether every line of the file was read
    pub fn is_complete(&self) -> bool {
        self.opened && self.error.is_none()
    }
}

/// Read `path` into the line queue without blocking the async runtime
pub async fn read_file(path: PathBuf, lines: mpsc::Sender<String>) -> FileReport {
    let task_path = path.clone();
    match task::spawn_blocking(move || read_file_blocking(&task_path, &lines)).await {
        Ok(report) => report,
        Err(e) => FileReport::new(&path).failed(Error::io(
            format!("Reader task for {} failed", path.display()),
            std::io::Error::other(e.to_string()),
        )),
    }
}

/// Read `path` into the line queue from a blocking context
pub fn read_file_blocking(path: &Path, lines: &mpsc::Sender<String>) -> FileReport {
    info!("Processing file: {}", path.display());
    let mut report = FileReport::new(path);

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return report.failed(Error::file_open(path, e)),
    };
    report.opened = true;

    // Concatenated gzip members are one file
    let mut reader = BufReader::new(MultiGzDecoder::new(file));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return report.failed(Error::decompression(path, e)),
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(
                    "Skipping line that is not valid UTF-8 in {}: {}",
                    path.display(),
                    e
                );
                report.invalid_lines += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        if lines.blocking_send(line.to_string()).is_err() {
            warn!(
                "Line queue closed while reading {}, stopping",
                path.display()
            );
            break;
        }
        report.lines += 1;
    }

    debug!(
        "Read {} lines from {} ({} invalid)",
        report.lines,
        path.display(),
        report.invalid_lines
    );
    report
}
