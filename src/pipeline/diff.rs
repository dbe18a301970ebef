//! Snapshot diffing
//!
//! Reconciles the current frame against the most recent Parquet snapshot in
//! the output location and writes the rows that changed to a
//! `DIFF_novos_registros_<tag>.csv` report.
//!
//! Two modes are supported:
//!
//! - **Full row** (default): a row is identified by its values over every
//!   column shared with the baseline. Rows of the current frame whose values
//!   do not appear in the baseline are "new". Identical new rows collapse
//!   into one, and a changed value reads as a brand new row.
//! - **Keyed**: rows are identified by a set of key columns and classified as
//!   added, modified or removed.
//!
//! Diffing is informational: every failure is logged and turned into
//! [`DiffOutcome::Failed`] so the export still happens.

use super::spec::DiffMode;
use crate::frame_io::{
    REPORT_DIALECT, concat_diagonal, read_parquet, unify_dtypes, write_delimited,
};
use crate::logging::FIRST_RUN;
use crate::storage::{ArtifactKind, SnapshotStore, base_tag};
use anyhow::{Context as _, Result, bail};
use chrono::Local;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Name of the classification column added in keyed mode.
pub const CHANGE_KIND_COLUMN: &str = "change_kind";

/// Identity of a row: its values rendered as text, `None` for null.
type RowKey = Vec<Option<String>>;

/// Rows that changed between the baseline and the current frame
#[derive(Debug, Clone)]
pub struct DiffReport {
    /// Rows only in the current frame
    pub added: DataFrame,
    /// Keyed mode: baseline rows whose key disappeared
    pub removed: DataFrame,
    /// Keyed mode: current rows whose key exists with different values
    pub modified: DataFrame,
}

impl DiffReport {
    fn added_only(added: DataFrame) -> Self {
        Self {
            removed: added.clear(),
            modified: added.clear(),
            added,
        }
    }

    /// Number of rows across all three classes.
    pub fn total(&self) -> usize {
        self.added.height() + self.removed.height() + self.modified.height()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Result of the diff stage
#[derive(Debug, Clone)]
pub enum DiffOutcome {
    /// Nothing to compare (empty frame)
    Skipped,
    /// No snapshot exists yet
    FirstRun,
    /// Compared against `baseline`, nothing changed
    NoChanges { baseline: PathBuf },
    /// Changes written to `path`
    Written {
        path: PathBuf,
        baseline: PathBuf,
        report: DiffReport,
    },
    /// Baseline unreadable, key columns missing, report not writable...
    Failed(String),
}

impl DiffOutcome {
    /// Location of the diff report, if one was written.
    pub fn report_path(&self) -> Option<&Path> {
        match self {
            Self::Written { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Compares a frame with the latest snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotDiffer<'a> {
    mode: &'a DiffMode,
}

impl<'a> SnapshotDiffer<'a> {
    pub fn new(mode: &'a DiffMode) -> Self {
        Self { mode }
    }

    /// Diff `current` against the latest snapshot in `store`.
    pub fn diff(&self, current: &DataFrame, store: &SnapshotStore) -> DiffOutcome {
        if current.height() == 0 {
            return DiffOutcome::Skipped;
        }

        match self.try_diff(current, store) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Failed to generate diff: {e:#}");
                DiffOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    fn try_diff(&self, current: &DataFrame, store: &SnapshotStore) -> Result<DiffOutcome> {
        let Some(baseline_path) = store.latest_snapshot()? else {
            tracing::info!("{FIRST_RUN}");
            return Ok(DiffOutcome::FirstRun);
        };

        let baseline_name = baseline_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("Comparing against previous snapshot: {baseline_name}");

        let baseline = read_parquet(&baseline_path)
            .with_context(|| format!("Failed to load baseline {baseline_name}"))?;

        let report = match self.mode {
            DiffMode::FullRow => DiffReport::added_only(full_row_diff(current, &baseline)?),
            DiffMode::Keyed { key_columns } => keyed_diff(current, &baseline, key_columns)?,
        };

        if report.is_empty() {
            tracing::info!("No new rows since {baseline_name}");
            return Ok(DiffOutcome::NoChanges {
                baseline: baseline_path,
            });
        }

        let mut frame = match self.mode {
            DiffMode::FullRow => report.added.clone(),
            DiffMode::Keyed { .. } => classified_frame(&report)?,
        };

        let (_, path) = store.publish_new(
            &base_tag(Local::now()),
            &[ArtifactKind::Diff],
            ArtifactKind::Diff,
            |partial| write_delimited(&mut frame, partial, REPORT_DIALECT),
        )?;

        tracing::info!("Diff generated with {} new rows.", report.added.height());
        if matches!(self.mode, DiffMode::Keyed { .. }) {
            tracing::info!(
                "Diff also lists {} modified and {} removed rows.",
                report.modified.height(),
                report.removed.height()
            );
        }

        Ok(DiffOutcome::Written {
            path,
            baseline: baseline_path,
            report,
        })
    }
}

/// Columns of `current` that also exist in `baseline`, with a common dtype.
fn shared_columns(current: &DataFrame, baseline: &DataFrame) -> Vec<(PlSmallStr, DataType)> {
    current
        .get_columns()
        .iter()
        .filter_map(|c| {
            let other = baseline.column(c.name().as_str()).ok()?;
            Some((c.name().clone(), unify_dtypes(c.dtype(), other.dtype())))
        })
        .collect()
}

/// One [`RowKey`] per row of `df`, built from `columns`.
fn row_keys(df: &DataFrame, columns: &[(PlSmallStr, DataType)]) -> Result<Vec<RowKey>> {
    let mut keys: Vec<RowKey> = vec![Vec::with_capacity(columns.len()); df.height()];

    for (name, dtype) in columns {
        let rendered = df
            .column(name.as_str())?
            .cast(dtype)?
            .cast(&DataType::String)
            .with_context(|| format!("Failed to compare column '{name}'"))?;
        let values = rendered.as_materialized_series().str()?.clone();

        for (key, value) in keys.iter_mut().zip(values.into_iter()) {
            key.push(value.map(str::to_owned));
        }
    }

    Ok(keys)
}

/// Current rows whose full-row key is absent from the baseline.
fn full_row_diff(current: &DataFrame, baseline: &DataFrame) -> Result<DataFrame> {
    let shared = shared_columns(current, baseline);
    if shared.is_empty() {
        bail!("Current data has no columns in common with the baseline");
    }

    let known: HashSet<RowKey> = row_keys(baseline, &shared)?.into_iter().collect();
    let mut emitted = HashSet::new();
    let mask: BooleanChunked = row_keys(current, &shared)?
        .into_iter()
        .map(|key| !known.contains(&key) && emitted.insert(key))
        .collect();

    let added = current.filter(&mask)?;
    with_baseline_columns(added, baseline)
}

/// Append the columns only the baseline has, as nulls.
fn with_baseline_columns(df: DataFrame, baseline: &DataFrame) -> Result<DataFrame> {
    concat_diagonal(vec![df, baseline.clear()])
}

fn keyed_diff(
    current: &DataFrame,
    baseline: &DataFrame,
    key_columns: &[String],
) -> Result<DiffReport> {
    if key_columns.is_empty() {
        bail!("Keyed diff needs at least one key column");
    }
    for key in key_columns {
        if current.get_column_index(key).is_none() {
            bail!("Key column '{key}' missing from current data");
        }
        if baseline.get_column_index(key).is_none() {
            bail!("Key column '{key}' missing from baseline");
        }
    }

    let shared = shared_columns(current, baseline);
    let key_spec: Vec<(PlSmallStr, DataType)> = shared
        .iter()
        .filter(|(name, _)| key_columns.iter().any(|k| k == name.as_str()))
        .cloned()
        .collect();

    let current_ids = row_keys(current, &key_spec)?;
    let current_rows = row_keys(current, &shared)?;
    let baseline_ids = row_keys(baseline, &key_spec)?;
    let baseline_rows = row_keys(baseline, &shared)?;

    // First occurrence wins for duplicated keys
    let mut previous: HashMap<&RowKey, &RowKey> = HashMap::with_capacity(baseline_ids.len());
    for (id, row) in baseline_ids.iter().zip(&baseline_rows) {
        previous.entry(id).or_insert(row);
    }

    let mut seen_added = HashSet::new();
    let mut seen_modified = HashSet::new();
    let mut added_mask = Vec::with_capacity(current_ids.len());
    let mut modified_mask = Vec::with_capacity(current_ids.len());
    for (id, row) in current_ids.iter().zip(&current_rows) {
        match previous.get(id) {
            None => {
                added_mask.push(seen_added.insert(id));
                modified_mask.push(false);
            }
            Some(old) => {
                added_mask.push(false);
                modified_mask.push(*old != row && seen_modified.insert(id));
            }
        }
    }

    let present: HashSet<&RowKey> = current_ids.iter().collect();
    let mut seen_removed = HashSet::new();
    let removed_mask: BooleanChunked = baseline_ids
        .iter()
        .map(|id| !present.contains(id) && seen_removed.insert(id))
        .collect();

    let added = current.filter(&BooleanChunked::from_slice("added".into(), &added_mask))?;
    let modified =
        current.filter(&BooleanChunked::from_slice("modified".into(), &modified_mask))?;
    let removed = baseline.filter(&removed_mask)?;

    Ok(DiffReport {
        added: with_baseline_columns(added, baseline)?,
        modified: with_baseline_columns(modified, baseline)?,
        removed: concat_diagonal(vec![current.clear(), removed])?,
    })
}

/// One frame with every class, tagged in a `change_kind` column.
fn classified_frame(report: &DiffReport) -> Result<DataFrame> {
    let tagged = [
        ("added", &report.added),
        ("modified", &report.modified),
        ("removed", &report.removed),
    ]
    .into_iter()
    .map(|(kind, frame)| -> Result<DataFrame> {
        let mut frame = frame.clone();
        let labels = Column::new(CHANGE_KIND_COLUMN.into(), vec![kind; frame.height()]);
        frame.with_column(labels)?;
        Ok(frame)
    })
    .collect::<Result<Vec<_>>>()?;

    concat_diagonal(tagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_io::write_parquet;
    use crate::pipeline::columns;

    fn store_with_baseline(dir: &Path, mut baseline: DataFrame) -> Result<SnapshotStore> {
        let store = SnapshotStore::open(dir)?;
        write_parquet(
            &mut baseline,
            &store.path_of(ArtifactKind::Snapshot, "20240101_000000"),
        )?;
        Ok(store)
    }

    fn clients(df: &DataFrame) -> Result<Vec<String>> {
        Ok(df
            .column(columns::CLIENT)?
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_owned())
            .collect())
    }

    #[test]
    fn test_first_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::open(dir.path())?;
        let current = df!(columns::CLIENT => &["Ana"])?;

        let outcome = SnapshotDiffer::new(&DiffMode::FullRow).diff(&current, &store);
        assert!(matches!(outcome, DiffOutcome::FirstRun));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_full_row_reports_only_new_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let baseline = df!(
            columns::CLIENT => &["Ana", "Bia"],
            columns::SALE_VALUE => &[100.0_f64, -10.0]
        )?;
        let store = store_with_baseline(dir.path(), baseline)?;

        let current = df!(
            columns::CLIENT => &["Ana", "Bia", "Caio", "Caio"],
            columns::SALE_VALUE => &[100.0_f64, -10.0, 200.0, 200.0]
        )?;

        let outcome = SnapshotDiffer::new(&DiffMode::FullRow).diff(&current, &store);
        let DiffOutcome::Written { path, report, .. } = outcome else {
            panic!("expected a diff report");
        };
        assert_eq!(clients(&report.added)?, ["Caio"]);
        assert!(report.removed.is_empty() && report.modified.is_empty());

        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        assert!(name.is_some_and(|n| n.starts_with("DIFF_novos_registros_")));
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().nth(1), Some("Caio;200,0"));
        Ok(())
    }

    #[test]
    fn test_full_row_no_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frame = df!(columns::CLIENT => &["Ana"], columns::SALE_VALUE => &[1.0_f64])?;
        let store = store_with_baseline(dir.path(), frame.clone())?;

        let outcome = SnapshotDiffer::new(&DiffMode::FullRow).diff(&frame, &store);
        assert!(matches!(outcome, DiffOutcome::NoChanges { .. }));
        assert!(store.list(ArtifactKind::Diff)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_full_row_tolerates_schema_drift() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let baseline = df!(
            columns::CLIENT => &["Ana"],
            "regiao" => &["Sul"]
        )?;
        let store = store_with_baseline(dir.path(), baseline)?;

        let current = df!(
            columns::CLIENT => &["Ana", "Bia"],
            columns::COST => &[1.0_f64, 2.0]
        )?;
        let baseline = read_parquet(&store.path_of(ArtifactKind::Snapshot, "20240101_000000"))?;
        let added = full_row_diff(&current, &baseline)?;

        assert_eq!(clients(&added)?, ["Bia"]);
        let names: Vec<String> = added.get_columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, [columns::CLIENT, columns::COST, "regiao"]);
        assert_eq!(added.column("regiao")?.null_count(), 1);
        Ok(())
    }

    #[test]
    fn test_unreadable_baseline_fails_softly() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::open(dir.path())?;
        std::fs::write(
            store.path_of(ArtifactKind::Snapshot, "20240101_000000"),
            b"not parquet",
        )?;

        let current = df!(columns::CLIENT => &["Ana"])?;
        let outcome = SnapshotDiffer::new(&DiffMode::FullRow).diff(&current, &store);
        assert!(matches!(outcome, DiffOutcome::Failed(_)));
        Ok(())
    }

    #[test]
    fn test_keyed_classifies_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let baseline = df!(
            columns::CLIENT => &["Ana", "Bia", "Davi"],
            columns::SALE_VALUE => &[100.0_f64, 50.0, 10.0]
        )?;
        let store = store_with_baseline(dir.path(), baseline)?;

        let current = df!(
            columns::CLIENT => &["Ana", "Bia", "Caio"],
            columns::SALE_VALUE => &[100.0_f64, 75.0, 200.0]
        )?;

        let mode = DiffMode::Keyed {
            key_columns: vec![columns::CLIENT.to_owned()],
        };
        let outcome = SnapshotDiffer::new(&mode).diff(&current, &store);
        let DiffOutcome::Written { path, report, .. } = outcome else {
            panic!("expected a keyed diff report");
        };

        assert_eq!(clients(&report.added)?, ["Caio"]);
        assert_eq!(clients(&report.modified)?, ["Bia"]);
        assert_eq!(clients(&report.removed)?, ["Davi"]);

        let text = std::fs::read_to_string(path)?;
        let header = text.lines().next().unwrap_or_default();
        assert!(header.ends_with(CHANGE_KIND_COLUMN));
        assert_eq!(text.lines().count(), 4);
        Ok(())
    }

    #[test]
    fn test_keyed_requires_key_on_both_sides() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_with_baseline(dir.path(), df!("outro" => &[1_i64])?)?;

        let mode = DiffMode::Keyed {
            key_columns: vec![columns::CLIENT.to_owned()],
        };
        let current = df!(columns::CLIENT => &["Ana"])?;
        assert!(matches!(
            SnapshotDiffer::new(&mode).diff(&current, &store),
            DiffOutcome::Failed(_)
        ));
        Ok(())
    }
}
