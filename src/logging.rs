//! Audit logging for pipeline runs
//!
//! The audit log is the only data contract shared with the monitoring
//! dashboard: one line per event, formatted as
//!
//! ```text
//! 2024-01-01 10:00:00,123 - INFO - >>> JOB INICIADO <<<
//! ```
//!
//! Each [`AuditLog`] owns its own `tracing` dispatcher writing to one
//! append-only file, so several pipelines (for example concurrent tests) never
//! contend over a process-wide subscriber.
//!
//! ## Usage
//!
//! ```no_run
//! use consolida::logging::AuditLog;
//!
//! let log = AuditLog::open("data/logs/processamento.log".as_ref(), false)?;
//! log.in_scope(|| tracing::info!("Hello from inside the run"));
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context as _, Result};
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

/// Start marker logged before the first stage runs.
pub const JOB_STARTED: &str = ">>> JOB INICIADO <<<";

/// End marker logged once the run is over, whatever its status.
pub const JOB_FINISHED: &str = ">>> JOB FINALIZADO <<<";

/// The dashboard counts exports by this substring.
pub const EXPORT_SUCCESS: &str = "Arquivos salvos com sucesso";

/// Logged by the differ when no snapshot exists yet.
pub const FIRST_RUN: &str = "Primeira execução: Sem histórico para comparar.";

/// Timestamp layout of every audit line (comma before milliseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Maps a `tracing` level to the label used in the log contract.
pub fn level_label(level: Level) -> &'static str {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG | Level::TRACE => "DEBUG",
    }
}

/// `<timestamp> - <LEVEL> - <message>` event formatter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditFormat;

impl<S, N> FormatEvent<S, N> for AuditFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} - {} - ",
            Local::now().format(TIMESTAMP_FORMAT),
            level_label(*event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Append-only audit log scoped to one pipeline instance.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    dispatch: Dispatch,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Opens (or creates) the log file and builds a dispatcher writing to it.
    ///
    /// With `echo_console` the same lines are mirrored to stderr.
    ///
    /// # Errors
    ///
    /// Returns error if the log directory cannot be created or the file
    /// cannot be opened for appending.
    pub fn open(path: &Path, echo_console: bool) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let file_name = path
            .file_name()
            .with_context(|| format!("Log path has no file name: {}", path.display()))?
            .to_string_lossy()
            .into_owned();

        // NEVER rotation with no suffix writes to exactly `dir/file_name`
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .context("Failed to create audit log appender")?;

        let file_layer = tracing_subscriber::fmt::layer()
            .event_format(AuditFormat)
            .with_ansi(false)
            .with_writer(appender)
            .with_filter(LevelFilter::INFO);

        let console_layer = echo_console.then(|| {
            tracing_subscriber::fmt::layer()
                .event_format(AuditFormat)
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::INFO)
        });

        let subscriber = tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer);

        Ok(Self {
            path: path.to_path_buf(),
            dispatch: Dispatch::new(subscriber),
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` with this log as the current `tracing` dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

/// Initializes the process-wide console subscriber used by the binary.
///
/// Defaults to INFO, override with `RUST_LOG`. Pipeline events go to the
/// run's [`AuditLog`]; this subscriber only sees CLI-level messages.
///
/// # Errors
///
/// Returns error if a global subscriber is already installed.
pub fn init_console() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create env filter")?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install console subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_line_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("processamento.log");
        let log = AuditLog::open(&path, false)?;

        log.in_scope(|| {
            tracing::info!("{JOB_STARTED}");
            tracing::warn!("something odd");
            tracing::error!("Failed to read broken.csv: bad header");
            tracing::debug!("not written");
        });

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let parts: Vec<&str> = lines[0].splitn(3, " - ").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].contains(','), "timestamp keeps the millisecond comma");
        assert_eq!(parts[1], "INFO");
        assert_eq!(parts[2], JOB_STARTED);

        assert!(lines[1].contains(" - WARNING - something odd"));
        assert!(lines[2].contains(" - ERROR - Failed to read broken.csv: bad header"));
        Ok(())
    }

    #[test]
    fn test_two_logs_do_not_share_a_sink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = AuditLog::open(&dir.path().join("a.log"), false)?;
        let second = AuditLog::open(&dir.path().join("b.log"), false)?;

        first.in_scope(|| tracing::info!("only in a"));
        second.in_scope(|| tracing::info!("only in b"));

        let a = std::fs::read_to_string(first.path())?;
        let b = std::fs::read_to_string(second.path())?;
        assert!(a.contains("only in a") && !a.contains("only in b"));
        assert!(b.contains("only in b") && !b.contains("only in a"));
        Ok(())
    }

    #[test]
    fn test_log_appends_across_instances() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.log");

        AuditLog::open(&path, false)?.in_scope(|| tracing::info!("first"));
        AuditLog::open(&path, false)?.in_scope(|| tracing::info!("second"));

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().count(), 2);
        Ok(())
    }
}
