//! Filesystem watcher
//!
//! Watches the input location (non-recursively) and triggers a full pipeline
//! run when a supported file lands there and has finished being written.
//!
//! ```text
//! FolderWatcher::watch
//!   │
//!   ├─> notify::Watcher (filesystem events)
//!   ├─> InputConfig::classify (extension and lock-file filter)
//!   ├─> StabilityChecker (waits until the size stops changing)
//!   └─> Pipeline::run
//! ```
//!
//! Events that arrive together are handled as one batch: every new file is
//! waited on, then one run consumes them all.

pub mod stability;

pub use stability::{StabilityChecker, StabilityTiming};

use crate::error::{ConsolidaError, Result};
use crate::pipeline::{Pipeline, RunReport};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::Duration;

/// How long to block on the event channel before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runs the pipeline whenever new input files settle.
#[derive(Debug)]
pub struct FolderWatcher {
    pipeline: Pipeline,
    timing: StabilityTiming,
}

impl FolderWatcher {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            timing: StabilityTiming::default(),
        }
    }

    #[must_use]
    pub fn with_timing(mut self, timing: StabilityTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Watch until `stop` is set or the event source goes away.
    ///
    /// # Errors
    ///
    /// Returns error if the input location cannot be watched.
    pub fn watch(&self, stop: &AtomicBool) -> Result<()> {
        let input_dir = &self.pipeline.config().input_dir;
        std::fs::create_dir_all(input_dir)?;

        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| ConsolidaError::Other(format!("Failed to create watcher: {e}")))?;
        watcher
            .watch(input_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ConsolidaError::Other(format!("Failed to watch {}: {e}", input_dir.display()))
            })?;
        tracing::info!("Started watching: {}", input_dir.display());

        while !stop.load(Ordering::Relaxed) {
            let first = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut arrived = Vec::new();
            for event in std::iter::once(first).chain(rx.try_iter()) {
                match event {
                    Ok(event) => arrived.extend(self.arrivals(&event)),
                    Err(e) => tracing::warn!("Watcher error: {e}"),
                }
            }
            arrived.sort();
            arrived.dedup();

            if !arrived.is_empty() {
                self.handle_arrivals(arrived);
            }
        }

        tracing::info!("Stopped watching: {}", input_dir.display());
        Ok(())
    }

    /// Supported input files created (or moved in) by `event`.
    pub fn arrivals(&self, event: &Event) -> Vec<PathBuf> {
        let created = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        );
        if !created {
            return Vec::new();
        }

        let input = &self.pipeline.config().spec.input;
        event
            .paths
            .iter()
            .filter(|path| input.classify(path).is_some())
            .cloned()
            .collect()
    }

    /// Wait for every arrived file to settle, then run the pipeline once.
    ///
    /// Returns `None` when no file became stable or the run could not start.
    pub fn handle_arrivals(&self, paths: Vec<PathBuf>) -> Option<RunReport> {
        let mut ready = 0_usize;
        for path in paths {
            tracing::info!("Detected file: {}", path.display());
            match StabilityChecker::new(path, self.timing).wait() {
                Ok(()) => ready += 1,
                Err(e) => tracing::warn!("Skipping file: {e:#}"),
            }
        }
        if ready == 0 {
            return None;
        }

        match self.pipeline.run() {
            Ok(report) => {
                tracing::info!("{}", report.summary());
                Some(report)
            }
            Err(ConsolidaError::Busy(holder)) => {
                tracing::warn!("Run skipped, output location busy: {holder}");
                None
            }
            Err(e) => {
                tracing::error!("Run failed: {e}");
                None
            }
        }
    }
}
