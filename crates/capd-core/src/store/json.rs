//! Flat JSON document store with atomic replace on save.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Snapshot, Store, StoreError};

/// Default store location: `~/.local/state/capd/db.json`.
pub fn default_store_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("capd")?;
    Ok(xdg_dirs.place_state_file("db.json")?)
}

/// Store backed by a single pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Store for JsonFileStore {
    /// A missing file is an empty document. A corrupt file is an error; it is
    /// never overwritten with defaults.
    fn load(&self) -> Result<Snapshot, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(self.io_err(e)),
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Snapshot::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(StoreError::Serialize)?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| self.io_err(e))?;

        // Write beside the target and rename so a crash never leaves a torn document.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| self.io_err(e))?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }
}
