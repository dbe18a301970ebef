//! Pipeline specification data structures.
//!
//! Defines the JSON schema for the stage configuration: the fixed rename map
//! into the canonical schema, which canonical columns are numeric or dates,
//! which files the ingestor accepts, and how snapshots are diffed.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current pipeline spec version
pub const SPEC_VERSION: &str = "0.1";

/// Canonical column names produced by normalization and transformation.
pub mod columns {
    pub const CLIENT: &str = "cliente";
    pub const SALE_VALUE: &str = "valor_venda";
    pub const SALE_DATE: &str = "data_venda";
    pub const COST: &str = "custo";
    pub const SOURCE_FILE: &str = "source_file";
    pub const PROFIT_MARGIN: &str = "margem_lucro";
    pub const MARGIN_RATIO: &str = "margem_percentual";
}

/// Root pipeline specification structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    /// Specification version for future migrations
    pub version: String,

    /// Source column name -> canonical column name
    pub rename_map: BTreeMap<String, String>,

    /// Canonical columns coerced to Float64 (failures become 0.0)
    pub numeric_columns: Vec<String>,

    /// Canonical columns coerced to timestamps (failures become null)
    pub date_columns: Vec<String>,

    /// Files the ingestor picks up
    pub input: InputConfig,

    /// Snapshot diff behaviour
    pub diff: DiffMode,

    /// File name of the negative-value report (overwritten each run)
    pub validation_report: String,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        let rename_map = [
            ("Vendedor", columns::CLIENT),
            ("Valor", columns::SALE_VALUE),
            ("Data", columns::SALE_DATE),
            ("Custo", columns::COST),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_owned(), to.to_owned()))
        .collect();

        Self {
            version: SPEC_VERSION.to_owned(),
            rename_map,
            numeric_columns: vec![columns::SALE_VALUE.to_owned(), columns::COST.to_owned()],
            date_columns: vec![columns::SALE_DATE.to_owned()],
            input: InputConfig::default(),
            diff: DiffMode::default(),
            validation_report: "erros_validacao.csv".to_owned(),
        }
    }
}

impl PipelineSpec {
    /// Parse a pipeline spec from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json).context("Failed to parse pipeline spec JSON")?;
        spec.check_version()?;
        Ok(spec)
    }

    /// Reject specs written for another version of the schema.
    pub fn check_version(&self) -> Result<()> {
        if self.version != SPEC_VERSION {
            anyhow::bail!(
                "Unsupported spec version '{}', expected '{SPEC_VERSION}'",
                self.version
            );
        }
        Ok(())
    }

    /// Serialize pipeline spec to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize pipeline spec")
    }
}

/// Which files in the input location are ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Extensions read with the spreadsheet reader (lowercase, no dot)
    pub spreadsheet_extensions: Vec<String>,

    /// Extensions read with the delimited-text reader
    pub delimited_extensions: Vec<String>,

    /// Names starting with this prefix are office lock files and are skipped
    pub lock_file_prefix: String,

    /// Rows sampled when inferring CSV column types
    pub infer_schema_length: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            spreadsheet_extensions: ["xlsx", "xlsm", "xls", "ods"]
                .map(str::to_owned)
                .to_vec(),
            delimited_extensions: vec!["csv".to_owned()],
            lock_file_prefix: "~$".to_owned(),
            infer_schema_length: 10_000,
        }
    }
}

/// Format family of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Spreadsheet,
    Delimited,
}

impl InputConfig {
    /// Format of `path` if the ingestor should read it, `None` otherwise.
    pub fn classify(&self, path: &Path) -> Option<InputFormat> {
        let name = path.file_name()?.to_string_lossy();
        if !self.lock_file_prefix.is_empty() && name.starts_with(&self.lock_file_prefix) {
            return None;
        }

        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if self.spreadsheet_extensions.contains(&ext) {
            Some(InputFormat::Spreadsheet)
        } else if self.delimited_extensions.contains(&ext) {
            Some(InputFormat::Delimited)
        } else {
            None
        }
    }
}

/// How the current run is reconciled against the last snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DiffMode {
    /// Whole-row equality over the shared columns; reports added rows only
    #[default]
    FullRow,

    /// Reconcile by an identity key; reports added, removed and modified rows
    Keyed { key_columns: Vec<String> },
}
