//! The consolidation pipeline.
//!
//! Files dropped into the input location go through six stages, each one
//! consuming the frame produced by the previous:
//!
//! 1. **Ingest**: read every supported file, tag rows with `source_file`
//! 2. **Normalize**: canonical column names, trimmed text, coerced numbers and dates
//! 3. **Transform**: derived `margem_lucro` / `margem_percentual`
//! 4. **Validate**: copy negative sale values to the validation report
//! 5. **Diff**: compare with the latest snapshot, write new rows to a diff report
//! 6. **Export**: persist the frame as a Parquet + CSV snapshot pair
//!
//! Stages never abort a run. Each returns an explicit outcome that ends up in
//! the [`RunReport`], so callers can tell a degraded run from a clean one.
//!
//! # Example
//!
//! ```no_run
//! use consolida::config::AppConfig;
//! use consolida::pipeline::Pipeline;
//!
//! let config = AppConfig::default();
//! config.ensure_dirs()?;
//!
//! let report = Pipeline::new(config)?.run()?;
//! println!("{}", report.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod diff;
pub mod executor;
pub mod export;
pub mod ingest;
pub mod normalize;
pub mod spec;
pub mod transform;
pub mod validation;

pub use diff::{CHANGE_KIND_COLUMN, DiffOutcome, DiffReport, SnapshotDiffer};
pub use executor::{Pipeline, RunReport, RunStatus};
pub use export::{ExportOutcome, ExportReport, Exporter};
pub use ingest::{FileFault, IngestReport, Ingestor};
pub use normalize::{Normalizer, parse_datetime};
pub use spec::{DiffMode, InputConfig, InputFormat, PipelineSpec, SPEC_VERSION, columns};
pub use transform::Transformer;
pub use validation::{ValidationOutcome, Validator, negative_sales};
