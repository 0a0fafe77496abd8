use super::*;
use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writes `video bytes + audio bytes` to the output, or fails on demand.
#[derive(Default)]
struct FakeMerge {
    fail: bool,
    calls: Mutex<Vec<(PathBuf, PathBuf, PathBuf)>>,
}

impl MergeTool for FakeMerge {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((video.to_path_buf(), audio.to_path_buf(), output.to_path_buf()));
        if self.fail {
            bail!("simulated failure");
        }
        let mut data = fs::read(video)?;
        data.extend(fs::read(audio)?);
        fs::write(output, data)?;
        Ok(())
    }
}

fn coordinator(tool: Arc<FakeMerge>) -> MergeCoordinator {
    MergeCoordinator::new(tool, 1024).with_cleanup_retry(2, Duration::ZERO)
}

#[test]
fn merges_pair_and_deletes_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("Title.f299.mp4"), vec![1u8; 4096]).unwrap();
    fs::write(dir.join("Title.f140.mp4"), vec![2u8; 2048]).unwrap();
    fs::write(dir.join("Title.f299.mp4.ytdl"), b"{}").unwrap();
    fs::write(dir.join("Title.f299.mp4-Frag12"), b"piece").unwrap();
    fs::write(dir.join("Title.jpg"), b"thumb").unwrap();

    let tool = Arc::new(FakeMerge::default());
    let report = coordinator(tool.clone()).merge_in_folder(dir).unwrap();

    assert_eq!(report.merged, vec![dir.join("Title.mp4")]);
    assert_eq!(fs::metadata(dir.join("Title.mp4")).unwrap().len(), 6144);
    assert!(!dir.join("Title.f299.mp4").exists());
    assert!(!dir.join("Title.f140.mp4").exists());
    assert!(!dir.join("Title.f299.mp4.ytdl").exists());
    assert!(!dir.join("Title.f299.mp4-Frag12").exists());
    assert!(dir.join("Title.jpg").exists());
    assert_eq!(tool.calls.lock().unwrap().len(), 1);
}

#[test]
fn rerun_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("T.f299.mp4"), vec![1u8; 10]).unwrap();
    fs::write(dir.join("T.f140.m4a"), vec![2u8; 10]).unwrap();

    let tool = Arc::new(FakeMerge::default());
    let c = coordinator(tool.clone());
    c.merge_in_folder(dir).unwrap();
    let second = c.merge_in_folder(dir).unwrap();
    assert_eq!(second, MergeReport::default());
    assert_eq!(tool.calls.lock().unwrap().len(), 1);
}

#[test]
fn failure_prunes_only_small_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("T.f299.mp4"), vec![1u8; 4096]).unwrap();
    fs::write(dir.join("T.f140.m4a"), vec![2u8; 100]).unwrap();
    fs::write(dir.join("T.f140.m4a.ytdl"), b"{}").unwrap();

    let tool = Arc::new(FakeMerge {
        fail: true,
        ..FakeMerge::default()
    });
    let report = coordinator(tool).merge_in_folder(dir).unwrap();

    assert_eq!(report.failed, vec![dir.join("T.mp4")]);
    assert_eq!(report.pruned, vec![dir.join("T.f140.m4a")]);
    assert!(dir.join("T.f299.mp4").exists());
    assert!(!dir.join("T.f140.m4a").exists());
    assert!(!dir.join("T.f140.m4a.ytdl").exists());
    assert!(!dir.join("T.mp4").exists());
}

#[test]
fn final_video_present_leaves_fragments_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("T.f248.webm"), vec![1u8; 10]).unwrap();
    fs::write(dir.join("T.f251.webm"), vec![2u8; 10]).unwrap();
    fs::write(dir.join("T.mkv"), b"done").unwrap();

    let tool = Arc::new(FakeMerge::default());
    let report = coordinator(tool.clone()).merge_in_folder(dir).unwrap();
    assert_eq!(report, MergeReport::default());
    assert!(tool.calls.lock().unwrap().is_empty());
    assert!(dir.join("T.f248.webm").exists());
    assert_eq!(fs::read(dir.join("T.mkv")).unwrap(), b"done");
}

/// Writes a large output and then reports failure, like an interrupted mux.
struct PartialWriteThenFail;

impl MergeTool for PartialWriteThenFail {
    fn merge(&self, _video: &Path, _audio: &Path, output: &Path) -> Result<()> {
        fs::write(output, vec![0u8; 2 * 1024 * 1024])?;
        bail!("muxer crashed");
    }
}

#[test]
fn failed_merge_removes_partial_output_and_can_be_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("T.f299.mp4"), vec![1u8; 4096]).unwrap();
    fs::write(dir.join("T.f140.m4a"), vec![2u8; 4096]).unwrap();

    let failing = MergeCoordinator::new(Arc::new(PartialWriteThenFail), 1024)
        .with_cleanup_retry(1, Duration::ZERO);
    let report = failing.merge_in_folder(dir).unwrap();
    assert_eq!(report.failed, vec![dir.join("T.mp4")]);
    assert!(!dir.join("T.mp4").exists());
    assert_ne!(
        crate::folder::inspect(dir, 1024 * 1024),
        crate::folder::FolderState::Complete
    );

    let tool = Arc::new(FakeMerge::default());
    let second = coordinator(tool.clone()).merge_in_folder(dir).unwrap();
    assert_eq!(second.merged, vec![dir.join("T.mp4")]);
    assert_eq!(tool.calls.lock().unwrap().len(), 1);
}

#[test]
fn tree_sweep_respects_depth() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let shallow = root.join("chan").join("[2024-01-01] A");
    let deep = root.join("a/b/c/d/e");
    for d in [&shallow, &deep] {
        fs::create_dir_all(d).unwrap();
        fs::write(d.join("A.f299.mp4"), vec![1u8; 10]).unwrap();
        fs::write(d.join("A.f140.m4a"), vec![2u8; 10]).unwrap();
    }

    assert_eq!(fragment_folders(root), vec![shallow.clone()]);

    let tool = Arc::new(FakeMerge::default());
    let report = coordinator(tool).merge_tree(root);
    assert_eq!(report.merged, vec![shallow.join("A.mp4")]);
    assert!(deep.join("A.f299.mp4").exists());
}

#[test]
fn ffmpeg_args_are_stream_copy() {
    let args = FfmpegMerge::args(Path::new("v.mp4"), Path::new("a.m4a"), Path::new("o.mp4"));
    assert_eq!(
        args,
        vec!["-loglevel", "error", "-y", "-i", "v.mp4", "-i", "a.m4a", "-c", "copy", "o.mp4"]
    );
}
