//! Ingestion of every supported file in the input location.

use super::spec::{InputConfig, InputFormat, columns};
use crate::frame_io::{concat_diagonal, read_delimited, read_spreadsheet};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// A file that was picked up but could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFault {
    pub path: PathBuf,
    pub cause: String,
}

/// Result of reading an input location
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Rows of every readable file, tagged with `source_file`
    pub frame: DataFrame,
    /// Files whose rows are in `frame`
    pub files_read: Vec<PathBuf>,
    /// Files skipped because reading them failed
    pub faults: Vec<FileFault>,
}

impl IngestReport {
    fn empty() -> Self {
        Self {
            frame: DataFrame::empty(),
            files_read: Vec::new(),
            faults: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Reads spreadsheets and delimited files into one frame.
#[derive(Debug, Clone, Copy)]
pub struct Ingestor<'a> {
    input: &'a InputConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(input: &'a InputConfig) -> Self {
        Self { input }
    }

    /// Read every supported file directly inside `dir`.
    ///
    /// A missing directory gives an empty report. A file that fails to read is
    /// logged and recorded as a [`FileFault`]; the others are still ingested.
    pub fn ingest(&self, dir: &Path) -> IngestReport {
        if !dir.is_dir() {
            tracing::debug!("Input location {} does not exist", dir.display());
            return IngestReport::empty();
        }

        let candidates = match self.candidates(dir) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Failed to list {}: {e:#}", dir.display());
                return IngestReport::empty();
            }
        };

        let mut report = IngestReport::empty();
        let mut frames = Vec::with_capacity(candidates.len());

        for (path, format) in candidates {
            let name = file_name(&path);
            match read_tagged(&path, &name, format, self.input.infer_schema_length) {
                Ok(df) => {
                    tracing::debug!("Read {} rows from {name}", df.height());
                    frames.push(df);
                    report.files_read.push(path);
                }
                Err(e) => {
                    tracing::error!("Failed to read {name}: {e:#}");
                    report.faults.push(FileFault {
                        path,
                        cause: format!("{e:#}"),
                    });
                }
            }
        }

        match concat_diagonal(frames) {
            Ok(frame) => report.frame = frame,
            Err(e) => {
                tracing::error!("Failed to combine input files: {e:#}");
                report.faults.extend(report.files_read.drain(..).map(|path| FileFault {
                    path,
                    cause: format!("{e:#}"),
                }));
            }
        }

        report
    }

    /// Supported files in `dir`, sorted by name.
    fn candidates(&self, dir: &Path) -> Result<Vec<(PathBuf, InputFormat)>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir).context("Failed to read input directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(format) = self.input.classify(&path) {
                found.push((path, format));
            }
        }
        found.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_tagged(
    path: &Path,
    name: &str,
    format: InputFormat,
    infer_schema_length: usize,
) -> Result<DataFrame> {
    let mut df = match format {
        InputFormat::Spreadsheet => read_spreadsheet(path)?,
        InputFormat::Delimited => read_delimited(path, infer_schema_length)?,
    };
    let provenance = Column::new(columns::SOURCE_FILE.into(), vec![name; df.height()]);
    df.with_column(provenance)
        .context("Failed to tag rows with their source file")?;
    Ok(df)
}
