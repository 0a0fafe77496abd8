//! `capd inspect DIR` – print a folder's classification.

use anyhow::Result;
use capd_core::config::CapdConfig;
use capd_core::folder;
use std::path::Path;

pub fn run_inspect(cfg: &CapdConfig, dir: &Path) -> Result<()> {
    let state = folder::inspect(dir, cfg.thresholds.complete_min_bytes);
    println!("{}: {}", dir.display(), state);
    if let Some(entries) = folder::read_entries(dir)? {
        for entry in entries {
            let size = entry
                .size
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {:>12}  {}", size, entry.name);
        }
    }
    Ok(())
}
