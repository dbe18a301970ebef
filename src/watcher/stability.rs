//! Waiting for a file to be fully written.

use anyhow::{Context as _, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How often and how long to poll a file's size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityTiming {
    /// Time between two size checks
    pub interval: Duration,
    /// Consecutive unchanged checks required
    pub required_checks: u32,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for StabilityTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            required_checks: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks the size of one file across checks.
#[derive(Debug)]
pub struct StabilityChecker {
    path: PathBuf,
    timing: StabilityTiming,
    last_size: Option<u64>,
    unchanged_count: u32,
    start_time: Instant,
}

impl StabilityChecker {
    pub fn new(path: PathBuf, timing: StabilityTiming) -> Self {
        Self {
            path,
            timing,
            last_size: None,
            unchanged_count: 0,
            start_time: Instant::now(),
        }
    }

    /// One size check. `Ok(true)` once the size held still long enough.
    pub fn check(&mut self) -> Result<bool> {
        if self.start_time.elapsed() > self.timing.timeout {
            anyhow::bail!("File stability timeout exceeded: {}", self.path.display());
        }

        let current_size = std::fs::metadata(&self.path)
            .with_context(|| format!("Failed to read file metadata: {}", self.path.display()))?
            .len();

        if self.last_size == Some(current_size) {
            self.unchanged_count += 1;
        } else {
            self.unchanged_count = 0;
            self.last_size = Some(current_size);
        }

        Ok(self.unchanged_count >= self.timing.required_checks)
    }

    /// Block until the file is stable, the timeout passes or it disappears.
    pub fn wait(mut self) -> Result<()> {
        while !self.check()? {
            std::thread::sleep(self.timing.interval);
        }
        Ok(())
    }
}
