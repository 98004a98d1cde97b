//! Per-job diagnostic logs.
//!
//! Every external invocation appends its stdout/stderr to one of these
//! files; failure notifications point operators at the path.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// `<dir>/<prefix>-<id>-<YYYYmmddTHHMMSS>.log`
pub fn job_log_path(dir: &Path, prefix: &str, id: &str) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}.log",
        prefix,
        id,
        Utc::now().format("%Y%m%dT%H%M%S")
    ))
}

/// Append one timestamped line, creating the file and its parent if needed.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "[{}] {}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), line)
}

/// Last `max_bytes` of the log, trimmed to whole lines. Empty when the
/// file is missing or unreadable.
pub fn tail(path: &Path, max_bytes: u64) -> String {
    let Ok(mut file) = fs::File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(max_bytes);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    let text = String::from_utf8_lossy(&buf);
    let text = if start > 0 {
        text.split_once('\n').map(|(_, rest)| rest).unwrap_or(&text)
    } else {
        &text
    };
    text.trim().to_string()
}
