use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::auth::AuthReason;
use crate::queue::{JobKey, JobSeed};
use crate::store::InFlightDownload;

use super::monitor::{LineMonitor, LineSignal};
use super::process::{OutputStream, ProcessHandle};

/// Cap on retained diagnostic text; older output is dropped first.
pub const DIAGNOSTICS_CAP: usize = 64 * 1024;

/// Which termination path fired. Only the first one sticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Running,
    /// Supervisor stopped a fruitless forbidden-fragment loop.
    StreamEndedLoop,
    /// Supervisor stopped an auth-required video with no usable credential.
    AuthSkipped(AuthReason),
    /// Watchdog stopped a silent process and already rescheduled it.
    WatchdogKilled,
}

/// Runtime record of one supervised capture process.
#[derive(Debug)]
pub struct ActiveDownload {
    pub id: String,
    pub seed: JobSeed,
    pub dir: PathBuf,
    pub handle: ProcessHandle,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    pub last_output_at: Instant,
    diagnostics: String,
    termination: Termination,
    monitor: LineMonitor,
}

impl ActiveDownload {
    pub fn new(
        id: impl Into<String>,
        mut seed: JobSeed,
        dir: PathBuf,
        handle: ProcessHandle,
        monitor: LineMonitor,
        now: Instant,
        now_wall: DateTime<Utc>,
    ) -> Self {
        seed.dir = Some(dir.clone());
        Self {
            id: id.into(),
            seed,
            dir,
            handle,
            started_at: now,
            started_wall: now_wall,
            last_output_at: now,
            diagnostics: String::new(),
            termination: Termination::Running,
            monitor,
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.seed.key
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Record a termination path. Returns false if another one already fired.
    pub fn mark(&mut self, termination: Termination) -> bool {
        if self.termination != Termination::Running {
            return false;
        }
        self.termination = termination;
        true
    }

    /// Accumulated stderr, bounded to the last [`DIAGNOSTICS_CAP`] bytes.
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// Feed one output line. Every line refreshes the silence timer; stderr
    /// is kept as diagnostics. Signals are only raised while still running.
    pub fn record_output(
        &mut self,
        stream: OutputStream,
        line: &str,
        at: Instant,
        credentials_usable: bool,
    ) -> LineSignal {
        if at > self.last_output_at {
            self.last_output_at = at;
        }
        if stream == OutputStream::Stderr {
            self.push_diagnostic(line);
        }
        if self.termination != Termination::Running {
            return LineSignal::Nothing;
        }
        self.monitor.observe(line, credentials_usable)
    }

    fn push_diagnostic(&mut self, line: &str) {
        self.diagnostics.push_str(line);
        self.diagnostics.push('\n');
        if self.diagnostics.len() > DIAGNOSTICS_CAP {
            let mut cut = self.diagnostics.len() - DIAGNOSTICS_CAP;
            while !self.diagnostics.is_char_boundary(cut) {
                cut += 1;
            }
            self.diagnostics.drain(..cut);
        }
    }

    pub fn runtime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_output_at)
    }

    pub fn in_flight_record(&self) -> InFlightDownload {
        InFlightDownload {
            id: self.id.clone(),
            channel_id: self.seed.key.channel_id.clone(),
            video_id: self.seed.key.video_id.clone(),
            title: self.seed.title.clone(),
            username: self.seed.username.clone(),
            channel_name: self.seed.channel_name.clone(),
            video_link: self.seed.video_link.clone(),
            dir: Some(self.dir.clone()),
            started_at: self.started_wall,
        }
    }
}

/// Single-writer table of supervised processes, keyed by download id.
#[derive(Debug, Default)]
pub struct ActiveTable {
    downloads: HashMap<String, ActiveDownload>,
}

impl ActiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn insert(&mut self, download: ActiveDownload) {
        self.downloads.insert(download.id.clone(), download);
    }

    pub fn get(&self, id: &str) -> Option<&ActiveDownload> {
        self.downloads.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ActiveDownload> {
        self.downloads.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ActiveDownload> {
        self.downloads.remove(id)
    }

    pub fn contains_key(&self, key: &JobKey) -> bool {
        self.by_key(key).is_some()
    }

    pub fn by_key(&self, key: &JobKey) -> Option<&ActiveDownload> {
        self.downloads.values().find(|d| d.key() == key)
    }

    /// True if the channel already has a process for a video with this title.
    pub fn has_channel_title(&self, channel_id: &str, title: &str) -> bool {
        self.downloads
            .values()
            .any(|d| d.seed.key.channel_id == channel_id && d.seed.title == title)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveDownload> {
        self.downloads.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ActiveDownload> {
        self.downloads.values_mut()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.downloads.keys().cloned().collect();
        ids.sort();
        ids
    }
}
