use std::fs;
use std::path::Path;

use super::patterns;

/// What [`safe_cleanup`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    Missing,
    /// Kept because it holds video, audio or partial media.
    Protected(Vec<String>),
    /// Kept because it holds other files (thumbnails, metadata, ...).
    NotEmpty(Vec<String>),
    Failed(String),
}

/// Remove `dir` only if it is provably empty. Never deletes a directory that
/// holds protected media, whatever the caller believes about it.
pub fn safe_cleanup(dir: &Path, reason: &str) -> CleanupOutcome {
    let read = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CleanupOutcome::Missing,
        Err(e) => return CleanupOutcome::Failed(e.to_string()),
    };
    let mut names = Vec::new();
    for item in read {
        match item {
            Ok(item) => names.push(item.file_name().to_string_lossy().into_owned()),
            Err(e) => return CleanupOutcome::Failed(e.to_string()),
        }
    }
    names.sort();

    let protected: Vec<String> = names
        .iter()
        .filter(|n| patterns::is_protected(n))
        .cloned()
        .collect();
    if !protected.is_empty() {
        tracing::info!(
            path = %dir.display(),
            count = protected.len(),
            "not deleting folder with media files: {}",
            protected.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
        );
        return CleanupOutcome::Protected(protected);
    }

    if !names.is_empty() {
        tracing::info!(
            path = %dir.display(),
            count = names.len(),
            "not deleting non-empty folder"
        );
        return CleanupOutcome::NotEmpty(names);
    }

    match fs::remove_dir(dir) {
        Ok(()) => {
            tracing::info!(path = %dir.display(), reason, "removed empty folder");
            CleanupOutcome::Removed
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), "remove empty folder: {}", e);
            CleanupOutcome::Failed(e.to_string())
        }
    }
}
