//! Schema normalization: canonical names, trimmed text, coerced types.

use super::spec::PipelineSpec;
use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Parse the text forms of a date accepted in input files.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Renames, trims and coerces a raw ingested frame.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    spec: &'a PipelineSpec,
}

impl<'a> Normalizer<'a> {
    pub fn new(spec: &'a PipelineSpec) -> Self {
        Self { spec }
    }

    /// Normalize `df`; never drops a row.
    ///
    /// Coercion failures default to `0.0` for numeric columns and to null for
    /// date columns. Running it on an already-normalized frame changes nothing.
    /// The result is a newly assembled frame, so its schema always reflects
    /// the canonical names.
    pub fn normalize(&self, df: DataFrame) -> Result<DataFrame> {
        if df.width() == 0 {
            return Ok(df);
        }

        let columns = self
            .renamed(df.get_columns().to_vec())
            .into_iter()
            .map(|column| self.normalize_column(column))
            .collect::<Result<Vec<_>>>()?;

        DataFrame::new(columns).context("Failed to assemble normalized frame")
    }

    /// Apply the rename map without ever producing a duplicate name.
    fn renamed(&self, mut columns: Vec<Column>) -> Vec<Column> {
        let position =
            |columns: &[Column], name: &str| columns.iter().position(|c| c.name().as_str() == name);

        for (from, to) in &self.spec.rename_map {
            if from == to {
                continue;
            }
            let Some(idx) = position(&columns, from) else {
                continue;
            };
            if position(&columns, to).is_some() {
                tracing::warn!("Not renaming '{from}' to '{to}': '{to}' already exists");
                continue;
            }
            columns[idx].rename(to.as_str().into());
        }
        columns
    }

    fn normalize_column(&self, column: Column) -> Result<Column> {
        let column = trim_text(column)?;
        let name = column.name().as_str();

        if self.spec.numeric_columns.iter().any(|n| n == name) {
            Ok(coerce_numeric(&column)?.into_column())
        } else if self.spec.date_columns.iter().any(|n| n == name) {
            Ok(coerce_datetime(&column)?.into_column())
        } else {
            Ok(column)
        }
    }
}

/// Strip surrounding whitespace from a text column; other dtypes pass through.
fn trim_text(column: Column) -> Result<Column> {
    if column.dtype() != &DataType::String {
        return Ok(column);
    }

    let trimmed: StringChunked = column
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim))
        .collect();

    Ok(trimmed.with_name(column.name().clone()).into_column())
}

fn coerce_numeric(column: &Column) -> Result<Series> {
    let cast = column
        .cast(&DataType::Float64)
        .with_context(|| format!("Failed to coerce '{}' to a number", column.name()))?;

    let values: Float64Chunked = cast
        .as_materialized_series()
        .f64()?
        .into_iter()
        .map(|v| Some(v.filter(|x| !x.is_nan()).unwrap_or(0.0)))
        .collect();

    Ok(values.with_name(column.name().clone()).into_series())
}

fn coerce_datetime(column: &Column) -> Result<Series> {
    let target = DataType::Datetime(TimeUnit::Milliseconds, None);
    let name = column.name().clone();

    let series = match column.dtype() {
        DataType::Datetime(_, _) | DataType::Date | DataType::Null => column
            .cast(&target)
            .with_context(|| format!("Failed to coerce '{name}' to a timestamp"))?
            .as_materialized_series()
            .clone(),
        DataType::String => column
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_datetime).map(|d| d.and_utc().timestamp_millis()))
            .collect::<Int64Chunked>()
            .into_datetime(TimeUnit::Milliseconds, None)
            .into_series(),
        // Numbers and booleans are not dates
        _ => Series::full_null(name.clone(), column.len(), &target),
    };

    Ok(series.with_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::columns;

    fn raw_frame() -> PolarsResult<DataFrame> {
        df!(
            "Vendedor" => &[Some(" Ana "), Some("Bia"), None],
            "Valor" => &["100", "abc", " 7.5 "],
            "Data" => &["2024-01-01", "31/12/2023", "amanhã"],
            "Custo" => &[Some(40.0_f64), None, Some(f64::NAN)],
            "Regiao" => &["Sul", "Norte", "Leste"]
        )
    }

    #[test]
    fn test_parse_datetime_forms() {
        let day = |y, m, d| {
            NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        };
        assert_eq!(parse_datetime("2024-01-01"), day(2024, 1, 1));
        assert_eq!(parse_datetime("31/12/2023"), day(2023, 12, 31));
        assert_eq!(parse_datetime("2024/02/03"), day(2024, 2, 3));
        assert!(parse_datetime("2024-01-01 10:30:00").is_some());
        assert!(parse_datetime("2024-01-01T10:30:00.250").is_some());
        assert!(parse_datetime("2024-01-01T10:30:00+02:00").is_some());
        assert_eq!(parse_datetime("yesterday"), None);
        assert_eq!(parse_datetime("  "), None);
    }

    #[test]
    fn test_normalize_renames_trims_and_coerces() -> Result<()> {
        let spec = PipelineSpec::default();
        let df = Normalizer::new(&spec).normalize(raw_frame()?)?;

        let names: Vec<String> = df.get_columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            names,
            [columns::CLIENT, columns::SALE_VALUE, columns::SALE_DATE, columns::COST, "Regiao"]
        );
        assert_eq!(df.height(), 3);

        let clients = df.column(columns::CLIENT)?.as_materialized_series().str()?.clone();
        assert_eq!(clients.get(0), Some("Ana"));
        assert_eq!(clients.get(2), None);

        let sales = df.column(columns::SALE_VALUE)?.as_materialized_series().f64()?.clone();
        assert_eq!(sales.get(0), Some(100.0));
        assert_eq!(sales.get(1), Some(0.0));
        assert_eq!(sales.get(2), Some(7.5));

        let costs = df.column(columns::COST)?.as_materialized_series().f64()?.clone();
        assert_eq!(costs.get(1), Some(0.0));
        assert_eq!(costs.get(2), Some(0.0));

        let dates = df.column(columns::SALE_DATE)?;
        assert_eq!(
            dates.dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(dates.null_count(), 1);
        Ok(())
    }

    #[test]
    fn test_normalize_is_idempotent() -> Result<()> {
        let spec = PipelineSpec::default();
        let normalizer = Normalizer::new(&spec);

        let once = normalizer.normalize(raw_frame()?)?;
        let twice = normalizer.normalize(once.clone())?;

        assert_eq!(once.schema(), twice.schema());
        assert!(once.equals_missing(&twice));
        Ok(())
    }

    #[test]
    fn test_rename_never_clobbers_existing_column() -> Result<()> {
        let spec = PipelineSpec::default();
        let df = df!("Valor" => &["1"], "valor_venda" => &["2"])?;

        let out = Normalizer::new(&spec).normalize(df)?;
        assert!(out.get_column_index("Valor").is_some());
        let sales = out.column(columns::SALE_VALUE)?.as_materialized_series().f64()?.clone();
        assert_eq!(sales.get(0), Some(2.0));
        Ok(())
    }

    #[test]
    fn test_normalized_frame_resolves_canonical_names_lazily() -> Result<()> {
        let spec = PipelineSpec::default();
        let df = Normalizer::new(&spec).normalize(raw_frame()?)?;

        let picked = df
            .lazy()
            .select([col(columns::CLIENT), col(columns::SALE_VALUE) * lit(2.0)])
            .collect()?;
        let doubled = picked.column(columns::SALE_VALUE)?.as_materialized_series().f64()?.clone();
        assert_eq!(doubled.get(0), Some(200.0));
        let clients = picked.column(columns::CLIENT)?.as_materialized_series().str()?.clone();
        assert_eq!(clients.get(0), Some("Ana"));
        Ok(())
    }

    #[test]
    fn test_numeric_dates_become_null() -> Result<()> {
        let spec = PipelineSpec::default();
        let df = df!("Data" => &[45_000_i64, 45_001])?;

        let out = Normalizer::new(&spec).normalize(df)?;
        assert_eq!(out.column(columns::SALE_DATE)?.null_count(), 2);
        Ok(())
    }
}
