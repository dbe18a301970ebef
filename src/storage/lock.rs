//! Single-run lock over an output location.
//!
//! A run holds `.consolida.lock` in the output directory from start to end.
//! The file is created with `create_new`, so two processes can never both
//! believe they own it.

use crate::error::{ConsolidaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock file name inside the output location.
pub const LOCK_FILE_NAME: &str = ".consolida.lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created_at_rfc3339: String,
    operation: String,
}

/// Held for the whole run; removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Take the lock in `dir` for `operation`.
    ///
    /// A lock older than `stale_after` (or unreadable and older than that by
    /// modification time) is replaced. A live lock yields
    /// [`ConsolidaError::Busy`].
    pub fn acquire(dir: &Path, operation: &str, stale_after: Duration) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        // Second attempt only after a stale lock was removed
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        created_at_rfc3339: Utc::now().to_rfc3339(),
                        operation: operation.to_owned(),
                    };
                    file.write_all(serde_json::to_string(&info)?.as_bytes())?;
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path, stale_after) {
                        return Err(ConsolidaError::Busy(describe_holder(&path)));
                    }
                    tracing::warn!("Replacing stale run lock {}", path.display());
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ConsolidaError::Busy(describe_holder(&path)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing removal errors.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = fs::remove_file(&self.path)
                && e.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!("Failed to remove run lock {}: {e}", self.path.display());
            }
        }
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let created = read_info(path)
        .and_then(|info| DateTime::parse_from_rfc3339(&info.created_at_rfc3339).ok())
        .map(|dt| dt.with_timezone(&Utc));

    match created {
        Some(created) => Utc::now()
            .signed_duration_since(created)
            .to_std()
            .is_ok_and(|age| age >= stale_after),
        // Corrupt or half-written lock: judge by file age
        None => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_none_or(|age| age >= stale_after),
    }
}

fn describe_holder(path: &Path) -> String {
    match read_info(path) {
        Some(info) => format!(
            "run lock held by pid {} ({}) since {}; remove {} if that process is gone",
            info.pid,
            info.operation,
            info.created_at_rfc3339,
            path.display()
        ),
        None => format!("run lock {} is held", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    #[test]
    fn test_second_acquire_is_busy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = RunLock::acquire(dir.path(), "run", TEN_MINUTES)?;
        assert!(lock.path().exists());

        let err = RunLock::acquire(dir.path(), "run", TEN_MINUTES)
            .expect_err("lock is already held");
        assert!(matches!(err, ConsolidaError::Busy(ref msg) if msg.contains("pid")));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        RunLock::acquire(dir.path(), "run", TEN_MINUTES)?.release()?;
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_replaced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let info = LockInfo {
            pid: 1,
            created_at_rfc3339: "2000-01-01T00:00:00+00:00".to_owned(),
            operation: "run".to_owned(),
        };
        fs::write(dir.path().join(LOCK_FILE_NAME), serde_json::to_string(&info)?)?;

        let lock = RunLock::acquire(dir.path(), "upload", TEN_MINUTES)?;
        let held = read_info(lock.path()).expect("fresh lock info");
        assert_eq!(held.operation, "upload");
        assert_eq!(held.pid, std::process::id());
        Ok(())
    }

    #[test]
    fn test_corrupt_fresh_lock_is_respected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(LOCK_FILE_NAME), "{ not json")?;

        let err = RunLock::acquire(dir.path(), "run", TEN_MINUTES)
            .expect_err("fresh lock file must block");
        assert!(matches!(err, ConsolidaError::Busy(_)));

        // Zero staleness window: anything already there is reclaimed
        RunLock::acquire(dir.path(), "run", Duration::ZERO)?;
        Ok(())
    }
}
