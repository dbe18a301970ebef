//! Upload processing.
//!
//! One uploaded file is staged into the input location, a full run is
//! executed, and the caller gets back the most useful artifact: the diff
//! report if the run wrote one, otherwise the latest consolidated export.

use crate::config::AppConfig;
use crate::error::{ConsolidaError, Result};
use crate::pipeline::{Pipeline, RunReport, RunStatus};
use crate::storage::SnapshotStore;
use std::fs;
use std::path::{Path, PathBuf};

/// What an upload produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The run wrote a diff report
    Diff(PathBuf),
    /// No diff; the most recent consolidated CSV export
    Consolidated(PathBuf),
    /// The run finished but no output file exists
    NothingProduced,
}

impl UploadOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Diff(path) | Self::Consolidated(path) => Some(path),
            Self::NothingProduced => None,
        }
    }
}

/// Process one uploaded file with the pipeline described by `config`.
///
/// `source` is where the upload currently lives and `original_name` the name
/// the client gave it; the file is staged as `input_dir/original_name` and
/// removed again once the run is over, whatever its outcome.
///
/// # Errors
///
/// - [`ConsolidaError::InvalidPath`] if `original_name` is not a plain file name
/// - [`ConsolidaError::Io`] if staging fails
/// - [`ConsolidaError::Rejected`] if the upload yields no rows
/// - [`ConsolidaError::Busy`] if another run holds the output location
pub fn process_upload(
    config: &AppConfig,
    source: &Path,
    original_name: &str,
) -> Result<UploadOutcome> {
    let pipeline = Pipeline::new(config.clone())?;
    process_upload_with(&pipeline, source, original_name)
}

/// Same as [`process_upload`] with an existing pipeline.
pub fn process_upload_with(
    pipeline: &Pipeline,
    source: &Path,
    original_name: &str,
) -> Result<UploadOutcome> {
    let config = pipeline.config();
    let file_name = plain_file_name(original_name)?;

    fs::create_dir_all(&config.input_dir)?;
    let staged = config.input_dir.join(file_name);
    fs::copy(source, &staged)?;

    let run = pipeline.log().in_scope(|| {
        tracing::info!("Upload received: {file_name}");
        pipeline.run_locked("upload")
    });

    if staged.exists()
        && let Err(e) = fs::remove_file(&staged)
    {
        pipeline
            .log()
            .in_scope(|| tracing::warn!("Failed to remove staged upload {file_name}: {e}"));
    }

    let report = run?;
    outcome_of(&report, &config.output_dir, file_name)
}

fn outcome_of(report: &RunReport, output_dir: &Path, file_name: &str) -> Result<UploadOutcome> {
    if report.status() == RunStatus::Empty {
        return Err(ConsolidaError::Rejected(format!(
            "{file_name} is empty or unreadable"
        )));
    }

    if let Some(diff) = report.diff_path() {
        return Ok(UploadOutcome::Diff(diff.to_path_buf()));
    }

    match SnapshotStore::open(output_dir)?.latest_export()? {
        Some(csv) => Ok(UploadOutcome::Consolidated(csv)),
        None => Ok(UploadOutcome::NothingProduced),
    }
}

/// Reject names that would escape the input location.
fn plain_file_name(name: &str) -> Result<&str> {
    let path = Path::new(name);
    match path.file_name().and_then(|n| n.to_str()) {
        Some(file_name) if file_name == name && !file_name.starts_with('.') => Ok(file_name),
        _ => Err(ConsolidaError::InvalidPath(format!(
            "Upload name must be a plain file name: {name:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_file_name() {
        assert!(plain_file_name("vendas.xlsx").is_ok());
        assert!(plain_file_name("../vendas.xlsx").is_err());
        assert!(plain_file_name("a/b.csv").is_err());
        assert!(plain_file_name(".hidden.csv").is_err());
        assert!(plain_file_name("").is_err());
    }

    #[test]
    fn test_upload_first_then_diff() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::rooted_at(dir.path());
        let upload = dir.path().join("upload.tmp");

        fs::write(&upload, "Vendedor,Valor,Data,Custo\nAna,100,2024-01-01,40\n")?;
        let first = process_upload(&config, &upload, "janeiro.csv")?;
        let UploadOutcome::Consolidated(csv) = &first else {
            panic!("first upload returns the consolidated export");
        };
        assert!(csv.to_string_lossy().ends_with(".csv"));
        assert!(!config.input_dir.join("janeiro.csv").exists());

        fs::write(&upload, "Vendedor,Valor,Data,Custo\nCaio,200,2024-01-03,50\n")?;
        let second = process_upload(&config, &upload, "fevereiro.csv")?;
        assert!(matches!(second, UploadOutcome::Diff(_)));
        assert!(!config.input_dir.join("fevereiro.csv").exists());
        Ok(())
    }

    #[test]
    fn test_empty_upload_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::rooted_at(dir.path());
        let upload = dir.path().join("upload.tmp");
        fs::write(&upload, "Vendedor,Valor\n")?;

        let err = process_upload(&config, &upload, "vazio.csv").expect_err("no rows");
        assert!(matches!(err, ConsolidaError::Rejected(_)));
        assert!(!config.input_dir.join("vazio.csv").exists());
        Ok(())
    }
}
