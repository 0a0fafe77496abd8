//! Fake collaborators for driving the orchestrator without real tools.
//!
//! The launcher hands out detached process handles and remembers every
//! termination request, so tests play the part of the capture tool by
//! injecting `ProcessEvent`s themselves.

use anyhow::Result;
use capd_core::auth::CredentialProbe;
use capd_core::config::CapdConfig;
use capd_core::dispatch::FeedItem;
use capd_core::merge::MergeTool;
use capd_core::notify::{Completion, Notifier};
use capd_core::orchestrator::{Collaborators, Orchestrator};
use capd_core::store::{MemoryStore, Snapshot};
use capd_core::supervisor::{
    LaunchError, LaunchRequest, Launcher, OutputStream, ProcessEvent, ProcessHandle,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const MIB: usize = 1024 * 1024;

#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<LaunchRequest>>,
    stops: Mutex<Vec<mpsc::UnboundedReceiver<()>>>,
}

impl FakeLauncher {
    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn last(&self) -> LaunchRequest {
        self.launched().last().cloned().expect("nothing launched")
    }

    /// True if the `n`th launched process was asked to terminate.
    pub fn stop_requested(&self, n: usize) -> bool {
        self.stops.lock().unwrap()[n].try_recv().is_ok()
    }
}

impl Launcher for FakeLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
        _events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle, LaunchError> {
        let (handle, stop_rx) = ProcessHandle::detached();
        self.stops.lock().unwrap().push(stop_rx);
        self.launched.lock().unwrap().push(request);
        Ok(handle)
    }
}

/// Concatenates both inputs into the output.
#[derive(Default)]
pub struct FakeMerge {
    pub calls: Mutex<usize>,
}

impl MergeTool for FakeMerge {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        let mut data = fs::read(video)?;
        data.extend(fs::read(audio)?);
        fs::write(output, data)?;
        Ok(())
    }
}

/// Remembers `(title, stream_ended)` for every completion.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, bool)>>,
}

impl Notifier for RecordingNotifier {
    fn download_finished(&self, done: &Completion<'_>) {
        self.sent
            .lock()
            .unwrap()
            .push((done.title.to_string(), done.stream_ended));
    }
}

pub struct FixedCredentials(pub bool);

impl CredentialProbe for FixedCredentials {
    fn usable(&self) -> bool {
        self.0
    }

    fn tool_args(&self) -> Vec<String> {
        if self.0 {
            vec!["--cookies".to_string(), "/etc/capd/cookies.txt".to_string()]
        } else {
            Vec::new()
        }
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<MemoryStore>,
    pub launcher: Arc<FakeLauncher>,
    pub merge: Arc<FakeMerge>,
    pub notifier: Arc<RecordingNotifier>,
    pub orch: Orchestrator,
}

pub fn harness(credentials: bool, tweak: impl FnOnce(&mut CapdConfig)) -> Harness {
    harness_with(credentials, Snapshot::default(), tweak)
}

pub fn harness_with(
    credentials: bool,
    snapshot: Snapshot,
    tweak: impl FnOnce(&mut CapdConfig),
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = CapdConfig {
        download_dir: tmp.path().join("download"),
        ..CapdConfig::default()
    };
    cfg.schedule.cancel_cleanup_delay_secs = 0;
    tweak(&mut cfg);

    let store = Arc::new(MemoryStore::with_snapshot(snapshot));
    let launcher = Arc::new(FakeLauncher::default());
    let merge = Arc::new(FakeMerge::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = Orchestrator::new(
        cfg,
        Collaborators {
            store: store.clone(),
            launcher: launcher.clone(),
            credentials: Arc::new(FixedCredentials(credentials)),
            merge_tool: merge.clone(),
            feed: None,
        },
    )
    .unwrap()
    .with_notifier(notifier.clone());
    Harness {
        tmp,
        store,
        launcher,
        merge,
        notifier,
        orch,
    }
}

pub fn item(video: &str, title: &str) -> FeedItem {
    FeedItem {
        channel_id: "UC1".to_string(),
        video_id: video.to_string(),
        title: title.to_string(),
        link: format!("https://www.youtube.com/watch?v={video}"),
        uploaded: None,
        username: Some("alice".to_string()),
        channel_name: Some("Alice".to_string()),
    }
}

pub fn stderr(id: &str, line: &str) -> ProcessEvent {
    ProcessEvent::Output {
        id: id.to_string(),
        stream: OutputStream::Stderr,
        line: line.to_string(),
        at: Instant::now(),
    }
}

pub fn exited(id: &str, code: Option<i32>) -> ProcessEvent {
    ProcessEvent::Exited {
        id: id.to_string(),
        code,
    }
}

/// Fragments the capture tool leaves behind when the stream ends mid-merge.
pub fn write_fragments(dir: &PathBuf, title: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("{title}.f299.mp4")), vec![1u8; 2 * MIB]).unwrap();
    fs::write(dir.join(format!("{title}.f140.m4a")), vec![2u8; 64 * 1024]).unwrap();
}
