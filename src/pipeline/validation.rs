//! Business-rule validation.
//!
//! Rows with a negative sale value are copied to a fixed-name report in the
//! output location. The mainline frame is never filtered and validation never
//! aborts a run.

use super::spec::columns;
use crate::frame_io::{VALIDATION_DIALECT, write_delimited};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// What the validator did with a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Empty frame or no sale-value column
    Skipped,
    /// No violations; an existing report is left as is
    Clean,
    /// Violating rows written to `path`
    Reported { path: PathBuf, rows: usize },
    /// The report could not be produced
    Failed(String),
}

/// Flags rows that break business invariants.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    report_name: &'a str,
}

impl<'a> Validator<'a> {
    pub fn new(report_name: &'a str) -> Self {
        Self { report_name }
    }

    /// Check `df` and write violations under `output_dir`.
    pub fn validate(&self, df: &DataFrame, output_dir: &Path) -> ValidationOutcome {
        if df.height() == 0 || df.get_column_index(columns::SALE_VALUE).is_none() {
            return ValidationOutcome::Skipped;
        }

        match self.write_violations(df, output_dir) {
            Ok(None) => ValidationOutcome::Clean,
            Ok(Some((path, rows))) => {
                tracing::warn!(
                    "{rows} rows with negative {} written to {}",
                    columns::SALE_VALUE,
                    self.report_name
                );
                ValidationOutcome::Reported { path, rows }
            }
            Err(e) => {
                tracing::error!("Failed to write validation report: {e:#}");
                ValidationOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    fn write_violations(
        &self,
        df: &DataFrame,
        output_dir: &Path,
    ) -> Result<Option<(PathBuf, usize)>> {
        let mut violations = negative_sales(df)?;
        if violations.height() == 0 {
            return Ok(None);
        }

        // Write beside the report, then swap it in with a rename
        let path = output_dir.join(self.report_name);
        let partial = output_dir.join(format!(".{}.partial", self.report_name));
        let written = write_delimited(&mut violations, &partial, VALIDATION_DIALECT)
            .and_then(|()| std::fs::rename(&partial, &path).context("Failed to replace report"));
        if written.is_err() && partial.exists() {
            std::fs::remove_file(&partial).ok();
        }
        written?;

        Ok(Some((path, violations.height())))
    }
}

/// Rows whose sale value is below zero (nulls are not violations).
pub fn negative_sales(df: &DataFrame) -> Result<DataFrame> {
    let sale = df.column(columns::SALE_VALUE)?.cast(&DataType::Float64)?;
    let mask = sale.as_materialized_series().f64()?.lt(0.0);
    df.filter(&mask).context("Failed to select negative sale values")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_rows_are_reported_not_removed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let df = df!(
            columns::CLIENT => &["Ana", "Bia"],
            columns::SALE_VALUE => &[100.0_f64, -10.0]
        )?;

        let outcome = Validator::new("erros_validacao.csv").validate(&df, dir.path());
        let ValidationOutcome::Reported { path, rows } = outcome else {
            panic!("expected a validation report");
        };
        assert_eq!(rows, 1);
        assert_eq!(df.height(), 2);

        let text = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "cliente;valor_venda");
        assert!(lines[1].starts_with("Bia;-10"), "decimal point kept: {}", lines[1]);
        Ok(())
    }

    #[test]
    fn test_report_is_overwritten() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = Validator::new("erros_validacao.csv");

        let first = df!(columns::SALE_VALUE => &[-1.0_f64, -2.0])?;
        let second = df!(columns::SALE_VALUE => &[-3.0_f64])?;
        validator.validate(&first, dir.path());
        validator.validate(&second, dir.path());

        let text = std::fs::read_to_string(dir.path().join("erros_validacao.csv"))?;
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("-3.0"));
        Ok(())
    }

    #[test]
    fn test_skip_and_clean() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = Validator::new("erros_validacao.csv");

        let no_column = df!(columns::CLIENT => &["Ana"])?;
        assert_eq!(validator.validate(&no_column, dir.path()), ValidationOutcome::Skipped);
        assert_eq!(
            validator.validate(&DataFrame::empty(), dir.path()),
            ValidationOutcome::Skipped
        );

        let clean = df!(columns::SALE_VALUE => &[Some(1.0_f64), None])?;
        assert_eq!(validator.validate(&clean, dir.path()), ValidationOutcome::Clean);
        assert!(!dir.path().join("erros_validacao.csv").exists());
        Ok(())
    }
}
