//! Folder state classification.
//!
//! A job's working directory is classified purely from file names and sizes
//! into [`FolderState`]. The classification never looks at timestamps or
//! process state, so it can be called from any code path without side effects.

mod cleanup;
pub mod patterns;

pub use cleanup::{safe_cleanup, CleanupOutcome};

use std::fmt;
use std::fs;
use std::path::Path;

/// What a working directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    /// Directory does not exist.
    Missing,
    /// Directory exists with zero entries.
    Empty,
    /// Only thumbnails, subtitles and other sidecars.
    Metadata,
    /// Fragments, partial files, a too-small final video, or unknown files.
    Incomplete,
    /// At least one final video above the size threshold.
    Complete,
}

impl FolderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderState::Missing => "missing",
            FolderState::Empty => "empty",
            FolderState::Metadata => "metadata",
            FolderState::Incomplete => "incomplete",
            FolderState::Complete => "complete",
        }
    }
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One directory entry as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    /// Size in bytes; `None` when it could not be read.
    pub size: Option<u64>,
}

impl FolderEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
        }
    }
}

/// Classify an existing directory's entries. `complete_min_bytes` is exclusive:
/// a final video must be strictly larger to count.
pub fn classify_entries(entries: &[FolderEntry], complete_min_bytes: u64) -> FolderState {
    if entries.is_empty() {
        return FolderState::Empty;
    }

    let mut has_final = false;
    let mut has_substantial_final = false;
    let mut has_partial = false;
    let mut has_unknown = false;

    for entry in entries {
        let name = entry.name.as_str();
        if patterns::is_final_video(name) {
            has_final = true;
            if entry.size.is_some_and(|s| s > complete_min_bytes) {
                has_substantial_final = true;
            }
        } else if patterns::is_partial(name) {
            has_partial = true;
        } else if !patterns::is_auxiliary(name) {
            has_unknown = true;
        }
    }

    if has_final {
        // A tiny final file is a failed merge, not an artifact.
        return if has_substantial_final {
            FolderState::Complete
        } else {
            FolderState::Incomplete
        };
    }
    if has_partial || has_unknown {
        return FolderState::Incomplete;
    }
    FolderState::Metadata
}

/// List `dir` as classifier entries. `Ok(None)` if the directory is missing.
pub fn read_entries(dir: &Path) -> std::io::Result<Option<Vec<FolderEntry>>> {
    let read = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut entries = Vec::new();
    for item in read {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        let size = item.metadata().ok().map(|m| m.len());
        entries.push(FolderEntry { name, size });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Some(entries))
}

/// Classify a directory on disk. An unreadable directory is reported as
/// `Incomplete` so that nothing downstream treats it as deletable.
pub fn inspect(dir: &Path, complete_min_bytes: u64) -> FolderState {
    if !dir.is_dir() {
        return FolderState::Missing;
    }
    match read_entries(dir) {
        Ok(Some(entries)) => classify_entries(&entries, complete_min_bytes),
        Ok(None) => FolderState::Missing,
        Err(e) => {
            tracing::warn!(path = %dir.display(), "cannot read folder: {}", e);
            FolderState::Incomplete
        }
    }
}
