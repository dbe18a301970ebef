//! Pipeline execution engine.
//!
//! Runs the six stages in order under the output location's run lock, inside
//! the pipeline's own audit log, and collects every stage outcome into a
//! [`RunReport`].

use super::diff::{DiffOutcome, SnapshotDiffer};
use super::export::{ExportOutcome, Exporter};
use super::ingest::{FileFault, Ingestor};
use super::normalize::Normalizer;
use super::transform::Transformer;
use super::validation::{ValidationOutcome, Validator};
use crate::config::AppConfig;
use crate::error::Result;
use crate::logging::{AuditLog, JOB_FINISHED, JOB_STARTED};
use crate::storage::{RunLock, SnapshotStore};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Overall classification of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Nothing was ingested
    Empty,
    /// Every stage succeeded
    Completed,
    /// The run finished but at least one file or stage failed
    Degraded,
}

/// Report generated after pipeline execution
#[derive(Debug)]
pub struct RunReport {
    /// Files whose rows were ingested
    pub files_read: Vec<PathBuf>,

    /// Files that could not be read
    pub faults: Vec<FileFault>,

    /// Rows in the final frame
    pub rows: usize,

    /// Columns in the final frame
    pub columns: usize,

    /// Normalizer or transformer errors (the run continued without them)
    pub stage_errors: Vec<String>,

    pub validation: ValidationOutcome,
    pub diff: DiffOutcome,
    pub export: ExportOutcome,

    /// Input files deleted after the Parquet snapshot was written
    pub inputs_consumed: Vec<PathBuf>,

    /// Time taken for execution
    pub duration: Duration,
}

impl RunReport {
    fn empty(faults: Vec<FileFault>, duration: Duration) -> Self {
        Self {
            files_read: Vec::new(),
            faults,
            rows: 0,
            columns: 0,
            stage_errors: Vec::new(),
            validation: ValidationOutcome::Skipped,
            diff: DiffOutcome::Skipped,
            export: ExportOutcome::Skipped,
            inputs_consumed: Vec::new(),
            duration,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.rows == 0 {
            return RunStatus::Empty;
        }

        let export_failed = match &self.export {
            ExportOutcome::Exported(report) => !report.is_complete(),
            ExportOutcome::Skipped => false,
        };

        if !self.faults.is_empty()
            || !self.stage_errors.is_empty()
            || matches!(self.validation, ValidationOutcome::Failed(_))
            || matches!(self.diff, DiffOutcome::Failed(_))
            || export_failed
        {
            RunStatus::Degraded
        } else {
            RunStatus::Completed
        }
    }

    /// Diff report written by this run, if any.
    pub fn diff_path(&self) -> Option<&Path> {
        self.diff.report_path()
    }

    /// Create a summary message
    pub fn summary(&self) -> String {
        let diff = match &self.diff {
            DiffOutcome::Skipped => "skipped".to_owned(),
            DiffOutcome::FirstRun => "first run".to_owned(),
            DiffOutcome::NoChanges { .. } => "no changes".to_owned(),
            DiffOutcome::Written { report, .. } => format!("{} changed rows", report.total()),
            DiffOutcome::Failed(_) => "failed".to_owned(),
        };
        let export = match &self.export {
            ExportOutcome::Skipped => "nothing exported".to_owned(),
            ExportOutcome::Exported(report) => {
                format!("{} files exported as {}", report.written().len(), report.tag)
            }
        };

        format!(
            "Run {:?}: {} files ({} failed), {} rows x {} columns, diff {diff}, {export}, {:.2}s",
            self.status(),
            self.files_read.len(),
            self.faults.len(),
            self.rows,
            self.columns,
            self.duration.as_secs_f64()
        )
    }
}

/// A configured pipeline bound to its audit log.
#[derive(Debug)]
pub struct Pipeline {
    config: AppConfig,
    log: AuditLog,
}

impl Pipeline {
    /// Build a pipeline, opening the audit log named in `config`.
    pub fn new(config: AppConfig) -> Result<Self> {
        let log = AuditLog::open(&config.log_file, config.echo_console)?;
        Ok(Self { config, log })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    /// Execute one full run.
    ///
    /// Stage failures are reported in the [`RunReport`]. `Err` is returned
    /// only when the output location is unusable or another run holds the
    /// lock on it.
    pub fn run(&self) -> Result<RunReport> {
        self.log.in_scope(|| self.run_locked("run"))
    }

    pub(crate) fn run_locked(&self, operation: &str) -> Result<RunReport> {
        let store = SnapshotStore::open(&self.config.output_dir).inspect_err(|e| {
            tracing::error!("Output location unusable: {e}");
        })?;

        let stale_after = Duration::from_secs(self.config.lock_stale_secs);
        let lock = RunLock::acquire(store.root(), operation, stale_after).inspect_err(|e| {
            tracing::warn!("Run not started: {e}");
        })?;

        tracing::info!("{JOB_STARTED}");
        let report = self.run_stages(&store);
        tracing::info!("{JOB_FINISHED}");

        if let Err(e) = lock.release() {
            tracing::warn!("Failed to release run lock: {e}");
        }
        Ok(report)
    }

    fn run_stages(&self, store: &SnapshotStore) -> RunReport {
        let start = Instant::now();
        let spec = &self.config.spec;

        let ingested = Ingestor::new(&spec.input).ingest(&self.config.input_dir);
        if ingested.is_empty() {
            tracing::info!("No input rows found in {}", self.config.input_dir.display());
            return RunReport::empty(ingested.faults, start.elapsed());
        }
        tracing::info!(
            "Ingested {} rows from {} files",
            ingested.frame.height(),
            ingested.files_read.len()
        );

        let mut stage_errors = Vec::new();
        let frame = apply_stage(ingested.frame, "normalize", &mut stage_errors, |df| {
            Normalizer::new(spec).normalize(df)
        });
        let frame = apply_stage(frame, "transform", &mut stage_errors, |df| {
            Transformer.transform(df)
        });

        let validation = Validator::new(&spec.validation_report).validate(&frame, store.root());
        let diff = SnapshotDiffer::new(&spec.diff).diff(&frame, store);
        let export = Exporter.export(&frame, store);

        let inputs_consumed = if self.config.consume_inputs && export.baseline_written() {
            consume(&ingested.files_read)
        } else {
            Vec::new()
        };

        let report = RunReport {
            files_read: ingested.files_read,
            faults: ingested.faults,
            rows: frame.height(),
            columns: frame.width(),
            stage_errors,
            validation,
            diff,
            export,
            inputs_consumed,
            duration: start.elapsed(),
        };
        tracing::info!("{}", report.summary());
        report
    }
}

/// Run a fallible frame stage; on failure log it and keep the input frame.
fn apply_stage<F>(frame: DataFrame, stage: &str, errors: &mut Vec<String>, f: F) -> DataFrame
where
    F: FnOnce(DataFrame) -> anyhow::Result<DataFrame>,
{
    match f(frame.clone()) {
        Ok(out) => out,
        Err(e) => {
            tracing::error!("Failed to {stage} data: {e:#}");
            errors.push(format!("{stage}: {e:#}"));
            frame
        }
    }
}

/// Delete ingested input files so they are not processed again.
fn consume(files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to remove processed input {}: {e}", path.display());
                false
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsolidaError;
    use crate::logging::{EXPORT_SUCCESS, FIRST_RUN};
    use std::fs;

    fn pipeline_in(base: &Path) -> Result<Pipeline> {
        let config = AppConfig::rooted_at(base);
        config.ensure_dirs()?;
        Pipeline::new(config)
    }

    #[test]
    fn test_empty_input_logs_both_markers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = pipeline_in(dir.path())?;

        let report = pipeline.run()?;
        assert_eq!(report.status(), RunStatus::Empty);

        let log = fs::read_to_string(pipeline.log().path())?;
        assert!(log.contains(JOB_STARTED));
        assert!(log.contains(JOB_FINISHED));
        assert_eq!(fs::read_dir(&pipeline.config().output_dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_first_run_exports_and_consumes_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = pipeline_in(dir.path())?;
        let input = pipeline.config().input_dir.join("vendas.csv");
        fs::write(&input, "Vendedor,Valor,Data,Custo\nAna,100,2024-01-01,40\n")?;

        let report = pipeline.run()?;
        assert_eq!(report.status(), RunStatus::Completed);
        assert!(matches!(report.diff, DiffOutcome::FirstRun));
        assert!(report.export.produced_files());
        assert_eq!(report.inputs_consumed, [input.clone()]);
        assert!(!input.exists());

        let log = fs::read_to_string(pipeline.log().path())?;
        assert!(log.contains(FIRST_RUN));
        assert!(log.contains(EXPORT_SUCCESS));
        Ok(())
    }

    #[test]
    fn test_busy_output_location() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = pipeline_in(dir.path())?;
        let _held = RunLock::acquire(
            &pipeline.config().output_dir,
            "other",
            Duration::from_secs(600),
        )?;

        let err = pipeline.run().expect_err("lock is held elsewhere");
        assert!(matches!(err, ConsolidaError::Busy(_)));

        let log = fs::read_to_string(pipeline.log().path())?;
        assert!(!log.contains(JOB_STARTED));
        Ok(())
    }

    #[test]
    fn test_failed_stage_keeps_previous_frame() -> anyhow::Result<()> {
        let frame = df!("a" => &[1_i64])?;
        let mut errors = Vec::new();

        let out = apply_stage(frame.clone(), "transform", &mut errors, |_| {
            anyhow::bail!("boom")
        });
        assert!(out.equals_missing(&frame));
        assert_eq!(errors, ["transform: boom"]);
        Ok(())
    }
}
