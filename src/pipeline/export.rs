//! Snapshot export: one Parquet baseline plus one text copy per run.

use crate::error::Result;
use crate::frame_io::{REPORT_DIALECT, write_delimited, write_parquet};
use crate::logging::EXPORT_SUCCESS;
use crate::storage::{ArtifactKind, SnapshotStore, base_tag};
use chrono::Local;
use polars::prelude::*;
use std::path::PathBuf;

const SNAPSHOT_PAIR: [ArtifactKind; 2] = [ArtifactKind::Snapshot, ArtifactKind::Export];

/// Files written by one export, each with its own result
#[derive(Debug)]
pub struct ExportReport {
    pub tag: String,
    pub parquet: Result<PathBuf>,
    pub csv: Result<PathBuf>,
}

impl ExportReport {
    /// Successfully written files.
    pub fn written(&self) -> Vec<&PathBuf> {
        [&self.parquet, &self.csv]
            .into_iter()
            .filter_map(|r| r.as_ref().ok())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.parquet.is_ok() && self.csv.is_ok()
    }
}

/// Result of the export stage
#[derive(Debug)]
pub enum ExportOutcome {
    /// Empty frame, nothing written
    Skipped,
    Exported(ExportReport),
}

impl ExportOutcome {
    /// `true` when at least one snapshot file exists afterwards.
    pub fn produced_files(&self) -> bool {
        matches!(self, Self::Exported(report) if !report.written().is_empty())
    }

    /// `true` when the Parquet snapshot, the next diff baseline, was written.
    pub fn baseline_written(&self) -> bool {
        matches!(self, Self::Exported(report) if report.parquet.is_ok())
    }
}

/// Persists the final frame as a timestamped snapshot pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exporter;

impl Exporter {
    /// Write `df` as `consolidado_<tag>.parquet` and `consolidado_<tag>.csv`.
    ///
    /// A failure on one file is logged and does not prevent the other.
    pub fn export(&self, df: &DataFrame, store: &SnapshotStore) -> ExportOutcome {
        if df.height() == 0 {
            return ExportOutcome::Skipped;
        }

        let base = base_tag(Local::now());

        let (tag, parquet) = match store.publish_new(
            &base,
            &SNAPSHOT_PAIR,
            ArtifactKind::Snapshot,
            |partial| write_parquet(&mut df.clone(), partial),
        ) {
            Ok((tag, path)) => (tag, Ok(path)),
            Err(e) => {
                tracing::error!("Failed to export Parquet snapshot: {e}");
                let tag = store
                    .allocate_tag(&base, &SNAPSHOT_PAIR)
                    .unwrap_or_else(|_| base.clone());
                (tag, Err(e))
            }
        };

        let csv = store.publish(ArtifactKind::Export, &tag, |partial| {
            write_delimited(&mut df.clone(), partial, REPORT_DIALECT)
        });
        if let Err(e) = &csv {
            tracing::error!("Failed to export CSV snapshot: {e}");
        }

        let report = ExportReport { tag, parquet, csv };
        if !report.written().is_empty() {
            tracing::info!("{EXPORT_SUCCESS}: {}", report.tag);
        }
        ExportOutcome::Exported(report)
    }
}
