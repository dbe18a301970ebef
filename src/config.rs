//! Application configuration
//!
//! Locations, the audit log file and run-level switches. Stage behaviour
//! lives in [`PipelineSpec`], embedded under the `spec` key.
//!
//! ```json
//! {
//!   "input_dir": "data/input",
//!   "output_dir": "data/output",
//!   "log_file": "data/logs/processamento.log",
//!   "consume_inputs": true,
//!   "spec": { "diff": { "mode": "full_row" } }
//! }
//! ```

use crate::pipeline::PipelineSpec;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default lock age (seconds) after which a leftover run lock is reclaimed.
pub const DEFAULT_LOCK_STALE_SECS: u64 = 600;

/// Top-level configuration of a pipeline deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Folder where spreadsheets and CSV files are dropped
    pub input_dir: PathBuf,
    /// Folder accumulating snapshots, diff files and the validation report
    pub output_dir: PathBuf,
    /// Append-only audit log read by the dashboard
    pub log_file: PathBuf,
    /// Delete successfully ingested inputs once a snapshot has been exported
    pub consume_inputs: bool,
    /// Age in seconds after which a leftover run lock counts as stale
    pub lock_stale_secs: u64,
    /// Mirror audit lines to stderr
    pub echo_console: bool,
    /// Stage configuration
    pub spec: PipelineSpec,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data").join("input"),
            output_dir: PathBuf::from("data").join("output"),
            log_file: PathBuf::from("data").join("logs").join("processamento.log"),
            consume_inputs: true,
            lock_stale_secs: DEFAULT_LOCK_STALE_SECS,
            echo_console: false,
            spec: PipelineSpec::default(),
        }
    }
}

impl AppConfig {
    /// Configuration rooted at `base` (`base/input`, `base/output`, `base/logs/...`).
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            input_dir: base.join("input"),
            output_dir: base.join("output"),
            log_file: base.join("logs").join("processamento.log"),
            ..Self::default()
        }
    }

    /// Load configuration from disk; a missing file yields the defaults.
    ///
    /// The embedded spec must carry the supported `version`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config JSON: {}", path.display()))?;
        config
            .spec
            .check_version()
            .with_context(|| format!("Invalid pipeline spec in {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Create the input, output and log directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        let log_dir = self.log_file.parent().filter(|p| !p.as_os_str().is_empty());
        for dir in [Some(self.input_dir.as_path()), Some(self.output_dir.as_path()), log_dir]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
