//! Fragment merge coordinator.
//!
//! After an abnormal end the capture tool can leave separate audio and video
//! fragments (`Title.f299.mp4`, `Title.f140.m4a`) behind. This module pairs
//! them by title and format id and invokes the external merge tool with
//! stream copy. Sources are deleted on success; on failure only fragments
//! small enough to be certainly corrupt are removed.

mod fragment;
mod plan;
mod run;
mod tool;

pub use fragment::{classify, is_fragment, Fragment, FragmentKind};
pub use plan::{output_ext, plan_folder, FolderPlan, MergePlan};
pub use run::{fragment_folders, MergeCoordinator, MergeReport, SWEEP_MAX_DEPTH};
pub use tool::{FfmpegMerge, MergeTool};

#[cfg(test)]
mod tests;
