//! Spreadsheet reader.
//!
//! Reads the first worksheet of a workbook, using its first row as the header.
//! A column whose cells are all numbers, all booleans or all dates gets that
//! type; anything mixed is kept as text so no cell is lost.

use anyhow::{Context as _, Result};
use calamine::{Data, Reader as _, open_workbook_auto};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::collections::HashSet;
use std::path::Path;

/// Read the first worksheet of `path` into a frame.
pub fn read_spreadsheet(path: &Path) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;

    let range = workbook
        .worksheet_range_at(0)
        .context("Workbook has no worksheets")?
        .context("Failed to read first worksheet")?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let body: Vec<&[Data]> = rows.collect();
    let names = header_names(header);

    let columns = names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells: Vec<&Data> = body
                .iter()
                .map(|row| row.get(idx).unwrap_or(&Data::Empty))
                .collect();
            build_column(name, &cells)
        })
        .collect::<Vec<_>>();

    DataFrame::new(columns).context("Failed to assemble worksheet frame")
}

/// Header labels with blanks named `Unnamed: <idx>` and repeats suffixed `.1`, `.2`...
fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let base = cell_text(cell)
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("Unnamed: {idx}"));

            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}.{n}");
                n += 1;
            }
            name
        })
        .collect()
}

fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime(),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok(),
        _ => None,
    }
}

/// Text form of a cell; `None` for empty cells.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(
            dt.as_datetime()
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| dt.as_f64().to_string()),
        ),
        Data::Error(e) => Some(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Int,
    Float,
    Bool,
    Date,
    Text,
}

fn cell_kind(cell: &Data) -> Option<CellKind> {
    match cell {
        Data::Empty => None,
        Data::Int(_) => Some(CellKind::Int),
        Data::Float(_) => Some(CellKind::Float),
        Data::Bool(_) => Some(CellKind::Bool),
        Data::DateTime(_) | Data::DateTimeIso(_) if cell_datetime(cell).is_some() => {
            Some(CellKind::Date)
        }
        _ => Some(CellKind::Text),
    }
}

/// Narrowest kind able to hold every non-empty cell.
fn column_kind(cells: &[&Data]) -> CellKind {
    cells
        .iter()
        .filter_map(|c| cell_kind(c))
        .reduce(|acc, kind| match (acc, kind) {
            (a, b) if a == b => a,
            (CellKind::Int | CellKind::Float, CellKind::Int | CellKind::Float) => CellKind::Float,
            _ => CellKind::Text,
        })
        .unwrap_or(CellKind::Text)
}

fn build_column(name: &str, cells: &[&Data]) -> Column {
    let series = match column_kind(cells) {
        CellKind::Int => Series::new(
            name.into(),
            cells
                .iter()
                .map(|c| match c {
                    Data::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        CellKind::Float => Series::new(
            name.into(),
            cells
                .iter()
                .map(|c| match c {
                    Data::Float(f) => Some(*f),
                    Data::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        CellKind::Bool => Series::new(
            name.into(),
            cells
                .iter()
                .map(|c| match c {
                    Data::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        CellKind::Date => cells
            .iter()
            .map(|c| cell_datetime(c).map(|d| d.and_utc().timestamp_millis()))
            .collect::<Int64Chunked>()
            .into_datetime(TimeUnit::Milliseconds, None)
            .into_series()
            .with_name(name.into()),
        CellKind::Text => Series::new(
            name.into(),
            cells.iter().map(|c| cell_text(c)).collect::<Vec<_>>(),
        ),
    };
    Column::from(series)
}
