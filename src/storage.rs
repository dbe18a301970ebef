//! Snapshot storage over the output location.
//!
//! The output directory accumulates, per run, a Parquet snapshot and a text
//! export sharing one time tag, an optional diff report, and the validation
//! report. Artifacts are write-once:
//!
//! - tags are `YYYYmmdd_HHMMSS`, with a `_001`, `_002`... suffix when a tag is
//!   already taken, so lexicographic order stays chronological;
//! - data is written to a hidden `.partial` file first and then linked to its
//!   final name, which fails if that name exists. Readers listing the
//!   directory never see a half-written snapshot.

pub mod lock;

pub use lock::RunLock;

use crate::error::{ConsolidaError, Result, ResultExt as _};
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Highest collision suffix tried before giving up on a tag.
const MAX_TAG_SEQUENCE: u32 = 999;

/// Kinds of timestamped artifacts kept in the output location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `consolidado_<tag>.parquet`, the diff baseline
    Snapshot,
    /// `consolidado_<tag>.csv`, the human-readable export
    Export,
    /// `DIFF_novos_registros_<tag>.csv`
    Diff,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Snapshot | Self::Export => "consolidado_",
            Self::Diff => "DIFF_novos_registros_",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Snapshot => "parquet",
            Self::Export | Self::Diff => "csv",
        }
    }

    pub fn file_name(self, tag: &str) -> String {
        format!("{}{tag}.{}", self.prefix(), self.extension())
    }

    fn matches(self, file_name: &str) -> bool {
        file_name.starts_with(self.prefix())
            && file_name
                .strip_suffix(self.extension())
                .is_some_and(|rest| rest.ends_with('.'))
    }
}

/// Second-granularity tag for `now`.
pub fn base_tag(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Storage backend for snapshots and reports
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open the store, creating the output directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create output directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, kind: ArtifactKind, tag: &str) -> PathBuf {
        self.root.join(kind.file_name(tag))
    }

    /// All artifacts of `kind`, sorted by file name (oldest first).
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if kind.matches(&name) && entry.file_type()?.is_file() {
                found.push(entry.path());
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }

    /// Most recent Parquet snapshot, the baseline for the next diff.
    pub fn latest_snapshot(&self) -> Result<Option<PathBuf>> {
        Ok(self.list(ArtifactKind::Snapshot)?.pop())
    }

    /// Most recent consolidated text export.
    pub fn latest_export(&self) -> Result<Option<PathBuf>> {
        Ok(self.list(ArtifactKind::Export)?.pop())
    }

    /// First tag derived from `base` for which none of `kinds` exists yet.
    pub fn allocate_tag(&self, base: &str, kinds: &[ArtifactKind]) -> Result<String> {
        (0..=MAX_TAG_SEQUENCE)
            .map(|seq| {
                if seq == 0 {
                    base.to_owned()
                } else {
                    format!("{base}_{seq:03}")
                }
            })
            .find(|tag| kinds.iter().all(|kind| !self.path_of(*kind, tag).exists()))
            .ok_or_else(|| {
                ConsolidaError::Other(format!("No free artifact name left for tag {base}"))
            })
    }

    /// Write an artifact through a hidden temp file and link it into place.
    ///
    /// Fails with an `AlreadyExists` I/O error if the final name is taken.
    pub fn publish<F>(&self, kind: ArtifactKind, tag: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>,
    {
        let file_name = kind.file_name(tag);
        let final_path = self.root.join(&file_name);
        let partial = self.root.join(format!(".{file_name}.partial"));

        let outcome = write(&partial)
            .map_err(ConsolidaError::from)
            .and_then(|()| link_exclusive(&partial, &final_path).map_err(ConsolidaError::from));

        if partial.exists()
            && let Err(e) = fs::remove_file(&partial)
        {
            tracing::warn!("Failed to remove temporary file {}: {e}", partial.display());
        }

        outcome.map(|()| final_path)
    }

    /// Publish `kind` under the first tag free for all of `reserve`.
    ///
    /// A name taken between allocation and linking moves on to the next
    /// suffix. Returns the tag used together with the final path.
    pub fn publish_new<F>(
        &self,
        base: &str,
        reserve: &[ArtifactKind],
        kind: ArtifactKind,
        mut write: F,
    ) -> Result<(String, PathBuf)>
    where
        F: FnMut(&Path) -> anyhow::Result<()>,
    {
        loop {
            let tag = self.allocate_tag(base, reserve)?;
            match self.publish(kind, &tag, &mut write) {
                Ok(path) => return Ok((tag, path)),
                Err(e) if is_name_collision(&e) => {
                    tracing::debug!("Artifact name for tag {tag} taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `true` when `err` reports a name collision during publishing.
pub fn is_name_collision(err: &ConsolidaError) -> bool {
    matches!(err, ConsolidaError::Io(e) if e.kind() == io::ErrorKind::AlreadyExists)
}

fn link_exclusive(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        // Filesystems without hard links: check, then rename
        Err(_) if to.exists() => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        )),
        Err(_) => fs::rename(from, to),
    }
}
