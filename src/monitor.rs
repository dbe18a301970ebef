//! Audit log reader for monitoring.
//!
//! Parses the `<timestamp> - <LEVEL> - <message>` lines written by
//! [`AuditLog`](crate::logging::AuditLog) and derives the counters a
//! dashboard shows: exports, errors, warnings, run boundaries and activity
//! per hour of day.

use crate::error::{Result, ResultExt as _};
use crate::logging::{EXPORT_SUCCESS, JOB_FINISHED, JOB_STARTED};
use chrono::{NaiveDateTime, Timelike as _};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LINE_SEPARATOR: &str = " - ";
const SECOND_PRECISION: &str = "%Y-%m-%d %H:%M:%S";

/// One parsed audit line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

impl LogEntry {
    /// Timestamp truncated to whole seconds, if it parses.
    pub fn time(&self) -> Option<NaiveDateTime> {
        let seconds = self.timestamp.split(',').next()?;
        NaiveDateTime::parse_from_str(seconds.trim(), SECOND_PRECISION).ok()
    }
}

/// Parse one audit line.
///
/// Everything after the second separator is the message, separators
/// included. Lines with fewer than three parts yield `None`.
pub fn parse_log_line(line: &str) -> Option<LogEntry> {
    let mut parts = line.splitn(3, LINE_SEPARATOR);
    let timestamp = parts.next()?;
    let level = parts.next()?;
    let message = parts.next()?;

    Some(LogEntry {
        timestamp: timestamp.to_owned(),
        level: level.to_owned(),
        message: message.trim().to_owned(),
    })
}

/// Parse a whole log, skipping malformed lines.
pub fn parse_log(text: &str) -> Vec<LogEntry> {
    text.lines().filter_map(parse_log_line).collect()
}

/// Read and parse the log file at `path`. A missing file is an empty log.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_log(&String::from_utf8_lossy(&bytes)))
}

/// Counters derived from a log stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogMetrics {
    pub entries: usize,
    pub exports: usize,
    pub errors: usize,
    pub warnings: usize,
    pub runs_started: usize,
    pub runs_finished: usize,

    /// Hour of day (0-23) to number of lines, lines with unparsable
    /// timestamps excluded
    pub activity_by_hour: BTreeMap<u32, usize>,
}

impl LogMetrics {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let marker = EXPORT_SUCCESS.to_lowercase();
        let mut metrics = Self {
            entries: entries.len(),
            ..Self::default()
        };

        for entry in entries {
            match entry.level.as_str() {
                "ERROR" => metrics.errors += 1,
                "WARNING" => metrics.warnings += 1,
                _ => {}
            }

            if entry.message.to_lowercase().contains(&marker) {
                metrics.exports += 1;
            }
            if entry.message == JOB_STARTED {
                metrics.runs_started += 1;
            } else if entry.message == JOB_FINISHED {
                metrics.runs_finished += 1;
            }

            if let Some(time) = entry.time() {
                *metrics.activity_by_hour.entry(time.hour()).or_default() += 1;
            }
        }

        metrics
    }

    /// Runs with a start marker but no end marker (crashed or still going).
    pub fn runs_unfinished(&self) -> usize {
        self.runs_started.saturating_sub(self.runs_finished)
    }
}

/// The `limit` most recently modified files of `dir`, newest first.
///
/// Hidden files (the run lock, in-flight `.partial` files) are skipped. A
/// missing directory yields an empty list.
pub fn recent_outputs(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        files.push((modified, path));
    }

    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(files.into_iter().take(limit).map(|(_, path)| path).collect())
}
