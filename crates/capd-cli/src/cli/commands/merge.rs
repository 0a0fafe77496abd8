//! `capd merge [DIR]` – merge leftover fragments once.

use anyhow::Result;
use capd_core::config::CapdConfig;
use capd_core::merge::{FfmpegMerge, MergeCoordinator};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run_merge(cfg: &CapdConfig, dir: Option<PathBuf>) -> Result<()> {
    let coordinator = MergeCoordinator::new(
        Arc::new(FfmpegMerge::new(cfg.tools.merge_bin.clone())),
        cfg.thresholds.corrupt_fragment_bytes,
    );
    let root = cfg.download_dir.clone();
    let report = tokio::task::spawn_blocking(move || match dir {
        Some(dir) => coordinator.merge_in_folder(&dir),
        None => Ok(coordinator.merge_tree(&root)),
    })
    .await??;

    for path in &report.merged {
        println!("merged  {}", path.display());
    }
    for path in &report.failed {
        println!("FAILED  {}", path.display());
    }
    for path in &report.pruned {
        println!("pruned  {}", path.display());
    }
    println!(
        "{} merged, {} failed, {} pruned",
        report.merged.len(),
        report.failed.len(),
        report.pruned.len()
    );
    Ok(())
}
