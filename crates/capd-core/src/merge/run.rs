use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use super::fragment;
use super::plan::{plan_folder, FolderPlan, MergePlan};
use super::tool::MergeTool;

/// How deep below the download root the tree sweep looks for fragments.
pub const SWEEP_MAX_DEPTH: usize = 4;

/// What one merge pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Outputs written in this pass.
    pub merged: Vec<PathBuf>,
    /// Outputs whose merge failed.
    pub failed: Vec<PathBuf>,
    /// Fragments deleted because they were below the corruption threshold.
    pub pruned: Vec<PathBuf>,
}

impl MergeReport {
    fn absorb(&mut self, other: MergeReport) {
        self.merged.extend(other.merged);
        self.failed.extend(other.failed);
        self.pruned.extend(other.pruned);
    }
}

/// Pairs leftover fragments and drives the merge tool. Blocking; run it on a
/// blocking thread from async code.
#[derive(Clone)]
pub struct MergeCoordinator {
    tool: Arc<dyn MergeTool>,
    corrupt_fragment_bytes: u64,
    cleanup_attempts: u32,
    cleanup_base_delay: Duration,
}

impl MergeCoordinator {
    pub fn new(tool: Arc<dyn MergeTool>, corrupt_fragment_bytes: u64) -> Self {
        Self {
            tool,
            corrupt_fragment_bytes,
            cleanup_attempts: 5,
            cleanup_base_delay: Duration::from_secs(1),
        }
    }

    /// Override the fragment-deletion retry schedule (attempt `n` waits
    /// `base * 2^n`).
    pub fn with_cleanup_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.cleanup_attempts = attempts.max(1);
        self.cleanup_base_delay = base_delay;
        self
    }

    /// Merge every complete pair in `dir`. Idempotent: a folder that already
    /// holds a final video is left alone.
    pub fn merge_in_folder(&self, dir: &Path) -> Result<MergeReport> {
        let names = list_names(dir)?;
        let plans = match plan_folder(&names) {
            FolderPlan::AlreadyMerged => {
                tracing::debug!(path = %dir.display(), "skipping merge, final video present");
                return Ok(MergeReport::default());
            }
            FolderPlan::Nothing => return Ok(MergeReport::default()),
            FolderPlan::Pairs(plans) => plans,
        };

        tracing::info!(path = %dir.display(), pairs = plans.len(), "merging fragments");
        let mut report = MergeReport::default();
        for plan in &plans {
            report.absorb(self.merge_one(dir, plan));
        }
        Ok(report)
    }

    /// Sweep the whole download tree (to [`SWEEP_MAX_DEPTH`]) and merge in
    /// every folder holding fragments. Per-folder errors are logged and skipped.
    pub fn merge_tree(&self, root: &Path) -> MergeReport {
        let mut report = MergeReport::default();
        for dir in fragment_folders(root) {
            match self.merge_in_folder(&dir) {
                Ok(r) => report.absorb(r),
                Err(e) => tracing::warn!(path = %dir.display(), "merge failed: {:#}", e),
            }
        }
        tracing::info!(
            root = %root.display(),
            merged = report.merged.len(),
            failed = report.failed.len(),
            "merge sweep finished"
        );
        report
    }

    fn merge_one(&self, dir: &Path, plan: &MergePlan) -> MergeReport {
        let mut report = MergeReport::default();
        let output = dir.join(&plan.output);
        let preexisting = output.exists();

        let video = dir.join(plan.video());
        let audio = dir.join(plan.audio());
        tracing::info!(
            video = %plan.video(),
            audio = %plan.audio(),
            output = %plan.output,
            "merging"
        );
        match self.tool.merge(&video, &audio, &output) {
            Ok(()) => {
                tracing::info!(title = %plan.title, "merged");
                self.delete_fragments(dir, plan);
                report.merged.push(output);
            }
            Err(e) => {
                tracing::error!(title = %plan.title, "merge failed: {:#}", e);
                // A failed merge must not leave an output that classifies as complete.
                if !preexisting {
                    remove_partial_output(&output);
                }
                report.pruned = self.prune_corrupt(dir, plan);
                report.failed.push(output);
            }
        }
        report
    }

    /// Delete the plan's fragments with their `.ytdl` sidecars and
    /// `<fragment>-Frag*` pieces, retrying files that cannot be removed yet.
    fn delete_fragments(&self, dir: &Path, plan: &MergePlan) {
        let names = list_names(dir).unwrap_or_default();
        let mut targets: Vec<PathBuf> = Vec::new();
        for frag in plan.fragments() {
            targets.push(dir.join(frag));
            targets.push(dir.join(format!("{frag}.ytdl")));
            let piece_prefix = format!("{frag}-Frag");
            targets.extend(
                names
                    .iter()
                    .filter(|n| n.starts_with(&piece_prefix))
                    .map(|n| dir.join(n)),
            );
        }

        let mut attempt = 1;
        loop {
            targets.retain(|p| match fs::remove_file(p) {
                Ok(()) => false,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    tracing::debug!(path = %p.display(), "delete fragment: {}", e);
                    true
                }
            });
            if targets.is_empty() {
                tracing::debug!(title = %plan.title, "fragment files cleaned up");
                return;
            }
            if attempt >= self.cleanup_attempts {
                tracing::warn!(
                    title = %plan.title,
                    remaining = targets.len(),
                    "could not delete fragment files after {} attempts",
                    attempt
                );
                return;
            }
            let delay = self.cleanup_base_delay.saturating_mul(1u32 << attempt.min(16));
            tracing::debug!(title = %plan.title, "retrying fragment cleanup in {:?}", delay);
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// After a failed merge, delete fragments below the corruption threshold
    /// (and their `.ytdl`) so the capture tool fetches them again.
    fn prune_corrupt(&self, dir: &Path, plan: &MergePlan) -> Vec<PathBuf> {
        let mut pruned = Vec::new();
        for frag in plan.fragments() {
            let path = dir.join(frag);
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            if meta.len() >= self.corrupt_fragment_bytes {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(
                        fragment = %frag,
                        bytes = meta.len(),
                        "deleted corrupt fragment"
                    );
                    let _ = fs::remove_file(dir.join(format!("{frag}.ytdl")));
                    pruned.push(path);
                }
                Err(e) => tracing::warn!(fragment = %frag, "delete corrupt fragment: {}", e),
            }
        }
        pruned
    }
}

fn remove_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => tracing::info!(output = %output.display(), "removed partial merge output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(output = %output.display(), "remove partial merge output: {}", e),
    }
}

fn list_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read folder {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read folder {}", dir.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Directories under `root` (inclusive) that directly contain fragment files.
pub fn fragment_folders(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .max_depth(SWEEP_MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .filter(|dir| {
            fs::read_dir(dir)
                .map(|rd| {
                    rd.filter_map(|e| e.ok())
                        .any(|e| fragment::is_fragment(&e.file_name().to_string_lossy()))
                })
                .unwrap_or(false)
        })
        .collect()
}
