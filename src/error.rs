//! Error handling for the consolidation pipeline.
//!
//! Stages never abort a run for recoverable faults: they report them through
//! their own outcome types (see [`crate::pipeline`]). `ConsolidaError` is what
//! crosses a module boundary when something is genuinely fatal, or when the
//! upload boundary must surface a rejection to its caller.
//!
//! ## Context Extension Trait
//!
//! ```no_run
//! use consolida::error::ResultExt as _;
//! use std::fs;
//!
//! fn load_spec() -> consolida::error::Result<String> {
//!     let text = fs::read_to_string("spec.json").context("Failed to load pipeline spec")?;
//!     Ok(text)
//! }
//! ```

use std::fmt;

/// Main error type for consolida operations.
#[derive(Debug)]
pub enum ConsolidaError {
    /// I/O errors (file operations, directory listing, etc.)
    Io(std::io::Error),

    /// Data processing errors (Polars, spreadsheet parsing, etc.)
    DataProcessing(String),

    /// Configuration errors
    Config(String),

    /// File not found or invalid path
    InvalidPath(String),

    /// Another run holds the lock on the output location
    Busy(String),

    /// Input refused at the service boundary (empty or unreadable upload)
    Rejected(String),

    /// Generic error with context
    Other(String),
}

impl fmt::Display for ConsolidaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::InvalidPath(msg) => write!(f, "Invalid path: {msg}"),
            Self::Busy(msg) => write!(f, "Pipeline busy: {msg}"),
            Self::Rejected(msg) => write!(f, "Rejected: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConsolidaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConsolidaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for ConsolidaError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line
        Self::Other(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for ConsolidaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for ConsolidaError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<calamine::Error> for ConsolidaError {
    fn from(err: calamine::Error) -> Self {
        Self::DataProcessing(format!("Spreadsheet error: {err}"))
    }
}

/// Result type alias for consolida operations.
pub type Result<T> = std::result::Result<T, ConsolidaError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ConsolidaError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: ConsolidaError = e.into();
            ConsolidaError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: ConsolidaError = e.into();
            ConsolidaError::Other(format!("{}: {}", f(), err))
        })
    }
}
