//! Reading and writing record sets.
//!
//! Inputs are read eagerly into a [`DataFrame`]; outputs are written as
//! Parquet (snapshot baselines) or delimited text. The text dialect used for
//! human-facing files is `;`-separated with a decimal comma.

pub mod excel;

pub use excel::read_spreadsheet;

use anyhow::{Context as _, Result};
use polars::prelude::*;
use std::path::Path;

/// Delimited-text output dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvDialect {
    pub separator: u8,
    pub decimal_comma: bool,
}

/// Consolidated exports and diff reports.
pub const REPORT_DIALECT: CsvDialect = CsvDialect {
    separator: b';',
    decimal_comma: true,
};

/// Validation report: semicolon separated, decimal point.
pub const VALIDATION_DIALECT: CsvDialect = CsvDialect {
    separator: b';',
    decimal_comma: false,
};

/// Read a comma-separated file with a header row.
pub fn read_delimited(path: &Path, infer_schema_length: usize) -> Result<DataFrame> {
    LazyCsvReader::new(path)
        .with_infer_schema_length(Some(infer_schema_length))
        .with_has_header(true)
        .finish()
        .context("Failed to scan CSV")?
        .collect()
        .context("Failed to read CSV")
}

/// Read a Parquet snapshot.
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    ParquetReader::new(file)
        .finish()
        .context("Failed to read Parquet")
}

/// Write `df` as Parquet to `path` (truncating).
pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).context("Failed to create Parquet file")?;
    ParquetWriter::new(file)
        .finish(df)
        .context("Failed to write Parquet file")?;
    Ok(())
}

/// Write `df` as delimited text to `path` (truncating).
pub fn write_delimited(df: &mut DataFrame, path: &Path, dialect: CsvDialect) -> Result<()> {
    let mut file = std::fs::File::create(path).context("Failed to create CSV file")?;
    let mut writer = CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(dialect.separator);

    let written = if dialect.decimal_comma {
        writer.finish(&mut with_decimal_comma(df)?)
    } else {
        writer.finish(df)
    };
    written.context("Failed to write CSV file")
}

/// Render float columns as text with `,` as the decimal separator.
fn with_decimal_comma(df: &DataFrame) -> Result<DataFrame> {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| -> Result<Column> {
            if !column.dtype().is_float() {
                return Ok(column.clone());
            }
            let rendered: StringChunked = column
                .cast(&DataType::Float64)?
                .as_materialized_series()
                .f64()?
                .into_iter()
                .map(|v| v.map(|x| format!("{x:?}").replace('.', ",")))
                .collect();
            Ok(rendered.with_name(column.name().clone()).into_column())
        })
        .collect::<Result<Vec<_>>>()?;
    DataFrame::new(columns).context("Failed to render decimal commas")
}

/// Common dtype of two columns with the same name from different frames.
///
/// Nulls adopt the other side, numerics widen to `Float64`, anything else
/// falls back to text.
pub(crate) fn unify_dtypes(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        a.clone()
    } else if matches!(a, DataType::Null) {
        b.clone()
    } else if matches!(b, DataType::Null) {
        a.clone()
    } else if a.is_primitive_numeric() && b.is_primitive_numeric() {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// Stack frames vertically over the union of their columns.
///
/// Columns keep first-seen order; a column missing from a frame is filled
/// with nulls for that frame's rows, and clashing dtypes meet at their
/// supertype.
pub fn concat_diagonal(frames: Vec<DataFrame>) -> Result<DataFrame> {
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }

    // Rebuilt so each plan starts from the frame's current schema
    let lazy: Vec<LazyFrame> = frames
        .into_iter()
        .map(|df| DataFrame::new(df.get_columns().to_vec()).map(IntoLazy::lazy))
        .collect::<PolarsResult<_>>()?;

    let args = UnionArgs {
        to_supertypes: true,
        ..Default::default()
    };
    concat_lf_diagonal(lazy, args)
        .context("Failed to plan concatenation")?
        .collect()
        .context("Failed to concatenate frames")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_diagonal_fills_missing_columns() -> Result<()> {
        let a = df!("cliente" => &["Ana"], "valor" => &[10_i64])?;
        let b = df!("cliente" => &["Bia"], "regiao" => &["Sul"])?;

        let out = concat_diagonal(vec![a, b])?;
        assert_eq!(out.height(), 2);
        let names: Vec<String> = out.get_columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["cliente", "valor", "regiao"]);
        assert_eq!(out.column("valor")?.null_count(), 1);
        assert_eq!(out.column("regiao")?.null_count(), 1);
        Ok(())
    }

    #[test]
    fn test_concat_diagonal_reconciles_dtypes() -> Result<()> {
        let ints = df!("valor" => &[1_i64], "nota" => &[7_i64])?;
        let floats = df!("valor" => &[2.5_f64], "nota" => &["sete"])?;

        let out = concat_diagonal(vec![ints, floats])?;
        assert_eq!(out.column("valor")?.dtype(), &DataType::Float64);
        assert_eq!(out.column("nota")?.dtype(), &DataType::String);

        let notes = out.column("nota")?.as_materialized_series().str()?.clone();
        assert_eq!(notes.get(0), Some("7"));
        assert_eq!(notes.get(1), Some("sete"));
        Ok(())
    }

    #[test]
    fn test_concat_of_nothing_is_empty() -> Result<()> {
        let out = concat_diagonal(Vec::new())?;
        assert!(out.is_empty());
        assert_eq!(out.width(), 0);
        Ok(())
    }

    #[test]
    fn test_report_dialect_uses_decimal_comma() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let mut df = df!("cliente" => &["Ana"], "margem_percentual" => &[0.6_f64])?;

        write_delimited(&mut df, &path, REPORT_DIALECT)?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().next(), Some("cliente;margem_percentual"));
        assert_eq!(text.lines().nth(1), Some("Ana;0,6"));
        Ok(())
    }

    #[test]
    fn test_validation_dialect_keeps_decimal_point() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("erros.csv");
        let mut df = df!("cliente" => &["Bia"], "valor_venda" => &[-10.5_f64], "qtd" => &[3_i64])?;

        write_delimited(&mut df, &path, VALIDATION_DIALECT)?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().nth(1), Some("Bia;-10.5;3"));

        write_delimited(&mut df, &path, REPORT_DIALECT)?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().nth(1), Some("Bia;-10,5;3"));
        Ok(())
    }

    #[test]
    fn test_parquet_preserves_types() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("snap.parquet");
        let mut df = df!("cliente" => &["Ana", "Bia"], "valor_venda" => &[100.0_f64, -10.0])?;

        write_parquet(&mut df, &path)?;
        let back = read_parquet(&path)?;
        assert!(back.equals_missing(&df));
        Ok(())
    }

    #[test]
    fn test_read_delimited_rejects_ragged_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.csv");
        std::fs::write(&path, "a,b\n1,2,3,4,5\n")?;

        assert!(read_delimited(&path, 100).is_err());
        Ok(())
    }
}
