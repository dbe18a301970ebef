//! Derived financial metrics.

use super::spec::columns;
use anyhow::{Context as _, Result};
use polars::prelude::*;

/// Decimal places kept in `margem_percentual`.
const RATIO_DECIMALS: i32 = 4;

/// Round half to even, like `round(x, decimals)` in the report tooling.
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// Adds `margem_lucro` and `margem_percentual` when sale value and cost exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer;

impl Transformer {
    /// Frames lacking either source column pass through unchanged.
    pub fn transform(&self, df: DataFrame) -> Result<DataFrame> {
        if df.get_column_index(columns::SALE_VALUE).is_none()
            || df.get_column_index(columns::COST).is_none()
        {
            return Ok(df);
        }

        let sale = col(columns::SALE_VALUE).cast(DataType::Float64);
        let cost = col(columns::COST).cast(DataType::Float64);
        let margin = sale.clone() - cost;

        let mut df = df
            .lazy()
            .with_columns([
                margin.clone().alias(columns::PROFIT_MARGIN),
                when(sale.clone().eq(lit(0.0)))
                    .then(lit(0.0))
                    .otherwise(margin / sale)
                    .alias(columns::MARGIN_RATIO),
            ])
            .collect()
            .context("Failed to derive margins")?;

        let ratio = df
            .column(columns::MARGIN_RATIO)?
            .as_materialized_series()
            .f64()?
            .apply_values(|v| round_to(v, RATIO_DECIMALS));
        df.with_column(ratio.into_series())?;
        Ok(df)
    }
}
