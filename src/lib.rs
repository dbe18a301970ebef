//! # Consolida
//!
//! Consolidates spreadsheet and CSV files dropped into an input folder into a
//! single cleaned dataset, keeps every run as a timestamped snapshot and
//! reports which rows are new since the previous snapshot.
//!
//! ## Quick Start
//!
//! ```no_run
//! use consolida::config::AppConfig;
//! use consolida::pipeline::Pipeline;
//!
//! let config = AppConfig::rooted_at("data".as_ref());
//! config.ensure_dirs()?;
//!
//! let report = Pipeline::new(config)?.run()?;
//! if let Some(diff) = report.diff_path() {
//!     println!("New rows written to {}", diff.display());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`pipeline`]: the six stages and the [`pipeline::Pipeline`] orchestrator
//! - [`storage`]: snapshot naming, collision-free publishing and the run lock
//! - [`frame_io`]: reading and writing CSV, spreadsheets and Parquet
//! - [`logging`]: the audit log every run writes
//! - [`monitor`]: metrics derived from the audit log
//! - [`service`]: one-shot processing of an uploaded file
//! - [`watcher`]: runs the pipeline when new files settle in the input folder
//! - [`config`] and [`error`]: configuration and error types

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod frame_io;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod watcher;
