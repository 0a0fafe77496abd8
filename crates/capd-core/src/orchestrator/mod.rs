//! Download lifecycle orchestrator.
//!
//! A single actor owns every piece of mutable orchestration state: the
//! active-process table, the auth-skip cache and the re-entry guards. It
//! reacts to three inputs, all serialized through one `select!` loop:
//! process events from supervised tools, control requests, and completion
//! of background work (merges, deferred cleanups, feed fetches). Periodic
//! timers drive the scan cycle, the retry sweep and the watchdog.
//!
//! Every handler loads a fresh [`Snapshot`](crate::store::Snapshot) from the
//! store, computes the next one and saves it. A failure in one handler is
//! logged and never stops the loop.

mod control;
mod cycles;
mod guard;
mod lifecycle;

pub use control::{
    default_control_socket_path, enqueue_line, ControlError, ControlHandle, ControlRequest,
};
pub use guard::ReentryGuard;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::auth::{AuthSkipCache, CredentialProbe};
use crate::config::CapdConfig;
use crate::dispatch::{Dispatcher, FeedError, FeedItem, FeedSource, NotFoundLog};
use crate::folder::CleanupOutcome;
use crate::merge::{MergeCoordinator, MergeReport, MergeTool};
use crate::notify::{NoNotifier, Notifier};
use crate::queue::{BackoffPolicy, RetryQueue};
use crate::store::Store;
use crate::supervisor::{validate_extra_flags, ActiveTable, Launcher, ProcessEvent};
use crate::watchdog::WatchdogPolicy;

/// External collaborators injected into the orchestrator.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub launcher: Arc<dyn Launcher>,
    pub credentials: Arc<dyn CredentialProbe>,
    pub merge_tool: Arc<dyn MergeTool>,
    /// Polled on every scan cycle; without one, scans only sweep the queue.
    pub feed: Option<Arc<dyn FeedSource>>,
}

/// Result of work run off the actor.
enum BackgroundDone {
    Merged {
        dir: PathBuf,
        result: Result<MergeReport>,
    },
    TreeMerged(MergeReport),
    CancelCleanup {
        dir: PathBuf,
        outcome: CleanupOutcome,
    },
    FeedFetched {
        source: String,
        result: Result<Vec<FeedItem>, FeedError>,
    },
}

pub struct Orchestrator {
    cfg: CapdConfig,
    store: Arc<dyn Store>,
    launcher: Arc<dyn Launcher>,
    credentials: Arc<dyn CredentialProbe>,
    feed: Option<Arc<dyn FeedSource>>,
    merge: MergeCoordinator,
    notifier: Arc<dyn Notifier>,
    queue: RetryQueue,
    dispatcher: Dispatcher,
    watchdog: WatchdogPolicy,
    extra_flags: Vec<String>,
    active: ActiveTable,
    skip_cache: AuthSkipCache,
    not_found_log: NotFoundLog,
    scan_guard: ReentryGuard,
    sweep_guard: ReentryGuard,
    background: JoinSet<BackgroundDone>,
    /// The in-flight feed fetch, so a failed task still ends its scan.
    feed_task: Option<task::Id>,
    process_tx: mpsc::UnboundedSender<ProcessEvent>,
    process_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    control_tx: mpsc::UnboundedSender<ControlRequest>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
}

impl Orchestrator {
    pub fn new(cfg: CapdConfig, deps: Collaborators) -> Result<Self> {
        cfg.validate()?;
        let extra_flags =
            validate_extra_flags(&cfg.tools.extra_flags).context("invalid [tools].extra_flags")?;
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Ok(Self {
            store: deps.store,
            launcher: deps.launcher,
            credentials: deps.credentials,
            feed: deps.feed,
            merge: MergeCoordinator::new(deps.merge_tool, cfg.thresholds.corrupt_fragment_bytes),
            notifier: Arc::new(NoNotifier),
            queue: RetryQueue::new(
                BackoffPolicy::from_config(&cfg.retry),
                cfg.max_concurrent_downloads,
            ),
            dispatcher: Dispatcher::from_config(&cfg),
            watchdog: WatchdogPolicy::from_config(&cfg.watchdog),
            extra_flags,
            active: ActiveTable::new(),
            skip_cache: AuthSkipCache::new(
                Duration::from_secs(cfg.auth.skip_ttl_secs),
                cfg.auth.skip_cache_max,
            ),
            not_found_log: NotFoundLog::default(),
            scan_guard: ReentryGuard::new(),
            sweep_guard: ReentryGuard::new(),
            background: JoinSet::new(),
            feed_task: None,
            process_tx,
            process_rx,
            control_tx,
            control_rx,
            cfg,
        })
    }

    /// Override the merge coordinator (e.g. a faster fragment-cleanup schedule).
    pub fn with_merge(mut self, merge: MergeCoordinator) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn control(&self) -> ControlHandle {
        ControlHandle::new(self.control_tx.clone())
    }

    pub fn active(&self) -> &ActiveTable {
        &self.active
    }

    pub fn skip_cache(&self) -> &AuthSkipCache {
        &self.skip_cache
    }

    pub fn config(&self) -> &CapdConfig {
        &self.cfg
    }

    /// Restart recovery plus the startup merge sweep, then the event loop
    /// until [`ControlRequest::Shutdown`].
    pub async fn run(mut self) -> Result<()> {
        self.startup()?;

        let mut scan = tokio::time::interval(Duration::from_secs(
            self.cfg.schedule.scan_interval_secs.max(1),
        ));
        let mut sweep = tokio::time::interval(Duration::from_secs(
            self.cfg.schedule.retry_sweep_secs.max(1),
        ));
        let mut watchdog = tokio::time::interval(self.cfg.watchdog_interval());
        for timer in [&mut scan, &mut sweep, &mut watchdog] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                Some(event) = self.process_rx.recv() => self.handle_process_event(event),
                Some(request) = self.control_rx.recv() => {
                    if request == ControlRequest::Shutdown {
                        break;
                    }
                    self.handle_control(request);
                }
                Some(done) = self.background.join_next(), if !self.background.is_empty() => {
                    self.handle_background(done);
                }
                _ = scan.tick() => self.scan(),
                _ = sweep.tick() => self.retry_sweep(),
                _ = watchdog.tick() => self.watchdog_tick(),
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Handle exactly one pending input (no timers). Returns false on
    /// shutdown. Lets callers drive the actor step by step.
    pub async fn process_next(&mut self) -> bool {
        tokio::select! {
            Some(event) = self.process_rx.recv() => self.handle_process_event(event),
            Some(request) = self.control_rx.recv() => {
                if request == ControlRequest::Shutdown {
                    return false;
                }
                self.handle_control(request);
            }
            Some(done) = self.background.join_next(), if !self.background.is_empty() => {
                self.handle_background(done);
            }
        }
        true
    }

    /// Wait for every background task (merges, deferred cleanups, feed
    /// fetches) and apply its result.
    pub async fn settle(&mut self) {
        while let Some(done) = self.background.join_next().await {
            self.handle_background(done);
        }
    }

    pub fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Cancel(id) => isolate("cancel", self.cancel(&id)),
            ControlRequest::Refresh => self.scan(),
            ControlRequest::Ingest(items) => {
                isolate("dispatch", self.dispatch(&items));
                self.retry_sweep();
            }
            ControlRequest::Shutdown => self.shutdown(),
        }
    }

    fn handle_background(&mut self, done: Result<BackgroundDone, JoinError>) {
        let done = match done {
            Ok(d) => d,
            Err(e) => {
                if self.feed_task == Some(e.id()) {
                    self.feed_task = None;
                    tracing::error!("feed fetch task failed: {}", e);
                    self.finish_scan(&[]);
                } else {
                    tracing::error!("background task failed: {}", e);
                }
                return;
            }
        };
        match done {
            BackgroundDone::Merged { dir, result } => match result {
                Ok(report) if !report.merged.is_empty() || !report.failed.is_empty() => {
                    tracing::info!(
                        path = %dir.display(),
                        merged = report.merged.len(),
                        failed = report.failed.len(),
                        pruned = report.pruned.len(),
                        "merge finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %dir.display(), "merge failed: {:#}", e),
            },
            BackgroundDone::TreeMerged(report) => {
                tracing::debug!(merged = report.merged.len(), "startup merge sweep applied");
            }
            BackgroundDone::CancelCleanup { dir, outcome } => {
                tracing::debug!(path = %dir.display(), ?outcome, "cancel cleanup finished");
            }
            BackgroundDone::FeedFetched { source, result } => self.on_feed_fetched(source, result),
        }
    }

    /// Stop every supervised process. Their in-flight records stay in the
    /// store and are recovered as due jobs on the next start.
    fn shutdown(&mut self) {
        tracing::info!(active = self.active.len(), "orchestrator shutting down");
        for download in self.active.iter() {
            download.handle.terminate();
        }
    }

    fn spawn_merge(&mut self, dir: PathBuf) {
        let merge = self.merge.clone();
        self.background.spawn_blocking(move || {
            let result = merge.merge_in_folder(&dir);
            BackgroundDone::Merged { dir, result }
        });
    }
}

/// Log and swallow a handler error so the loop keeps running.
fn isolate(what: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::error!("{} failed: {:#}", what, e);
    }
}

/// Instant + wall-clock pair read once per handler.
fn clock() -> (Instant, chrono::DateTime<chrono::Utc>) {
    (Instant::now(), chrono::Utc::now())
}
