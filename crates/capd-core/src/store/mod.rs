//! Persisted job store.
//!
//! The orchestrator never mutates the document in place across call sites:
//! each step loads a fresh [`Snapshot`], computes the next one, and saves it.

mod json;
mod memory;
pub mod types;

pub use json::{default_store_path, JsonFileStore};
pub use memory::MemoryStore;
pub use types::*;

use std::path::PathBuf;

/// Errors surfaced by a [`Store`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize store document: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Narrow persistence interface consumed by the orchestrator.
pub trait Store: Send + Sync {
    fn load(&self) -> Result<Snapshot, StoreError>;
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}
