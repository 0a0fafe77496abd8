use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::dispatch::{
    feed_backoff, fetch_with_retry, sanitize_title, Decision, DispatchContext, FeedError, FeedItem,
};
use crate::folder::{self, CleanupOutcome};
use crate::queue::{Admission, JobSeed};
use crate::store::{RetryJob, Snapshot};
use crate::supervisor::{
    capture_args, validate_link, ActiveDownload, LaunchError, LaunchRequest, LineMonitor,
};
use crate::watchdog;

use super::{clock, isolate, BackgroundDone, Orchestrator};

impl Orchestrator {
    /// Restart recovery: interrupted in-flight records become due jobs,
    /// duplicate and stale entries are repaired, and the download tree is
    /// swept for leftover fragments in the background.
    pub fn startup(&mut self) -> Result<()> {
        let now = Utc::now();
        let mut snapshot = self.store.load()?;
        let recovered = self.queue.recover_interrupted(&mut snapshot, now);
        let duplicates = self.queue.dedupe(&mut snapshot);
        let stale = self.queue.repair_stale(&mut snapshot, &self.active, now);
        self.store.save(&snapshot)?;
        tracing::info!(recovered, duplicates, stale, "startup recovery finished");

        let merge = self.merge.clone();
        let root = self.cfg.download_dir.clone();
        self.background
            .spawn_blocking(move || BackgroundDone::TreeMerged(merge.merge_tree(&root)));
        Ok(())
    }

    /// Scan cycle: sweep, fetch the feed, dispatch, sweep again. Overlapping
    /// triggers are coalesced.
    pub fn scan(&mut self) {
        if !self.scan_guard.try_enter() {
            tracing::debug!("scan already running, will replay once");
            return;
        }
        self.start_scan();
    }

    fn start_scan(&mut self) {
        self.retry_sweep();
        match self.feed.clone() {
            Some(feed) => {
                let retries = self.cfg.feed.fetch_retries;
                let backoff = feed_backoff(&self.cfg.feed);
                let handle = self.background.spawn(async move {
                    let source = feed.name();
                    let result = fetch_with_retry(feed, retries, backoff).await;
                    BackgroundDone::FeedFetched { source, result }
                });
                self.feed_task = Some(handle.id());
            }
            None => self.finish_scan(&[]),
        }
    }

    pub(super) fn on_feed_fetched(
        &mut self,
        source: String,
        result: Result<Vec<FeedItem>, FeedError>,
    ) {
        self.feed_task = None;
        let items = match result {
            Ok(items) => {
                self.not_found_log.clear(&source);
                items
            }
            Err(FeedError::NotFound(_)) => {
                if self.not_found_log.should_log(&source, Instant::now()) {
                    tracing::warn!(feed = %source, "feed not found (further 404s suppressed for an hour)");
                }
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(feed = %source, "feed fetch failed: {}", e);
                Vec::new()
            }
        };
        self.finish_scan(&items);
    }

    pub(super) fn finish_scan(&mut self, items: &[FeedItem]) {
        if !items.is_empty() {
            isolate("dispatch", self.dispatch(items));
        }
        self.retry_sweep();
        if self.scan_guard.exit() {
            tracing::debug!("replaying coalesced scan");
            self.start_scan();
        }
    }

    /// Run candidates through the dispatcher and persist what was enqueued.
    pub fn dispatch(&mut self, items: &[FeedItem]) -> Result<()> {
        let (now_instant, now) = clock();
        let mut snapshot = self.store.load()?;
        let mut ctx = DispatchContext {
            snapshot: &mut snapshot,
            active: &self.active,
            skip_cache: &mut self.skip_cache,
            credentials_usable: self.credentials.usable(),
            now,
            now_instant,
        };
        let mut enqueued = 0usize;
        for item in items {
            match self.dispatcher.consider(item, &self.queue, &mut ctx) {
                Decision::Enqueued { .. } => enqueued += 1,
                other => tracing::debug!(key = %item.key(), decision = ?other, "candidate not enqueued"),
            }
        }
        self.store.save(&snapshot)?;
        if enqueued > 0 {
            tracing::info!(enqueued, candidates = items.len(), "dispatch finished");
        }
        Ok(())
    }

    /// Start every due job the queue admits. Overlapping triggers are coalesced.
    pub fn retry_sweep(&mut self) {
        if !self.sweep_guard.try_enter() {
            return;
        }
        loop {
            isolate("retry sweep", self.sweep_once());
            if !self.sweep_guard.exit() {
                break;
            }
        }
    }

    fn sweep_once(&mut self) -> Result<()> {
        let now = Utc::now();
        let mut snapshot = self.store.load()?;
        let duplicates = self.queue.dedupe(&mut snapshot);
        let stale = self.queue.repair_stale(&mut snapshot, &self.active, now);
        if duplicates > 0 || stale > 0 {
            tracing::info!(duplicates, stale, "repaired retry queue");
        }

        for job in self.queue.due_jobs(&snapshot, now) {
            let key = job.job_key();
            if snapshot.is_excluded(&job.title) {
                self.queue.remove(&mut snapshot, &key);
                tracing::info!(key = %key, title = %job.title, "dropping excluded job");
                continue;
            }
            match self.queue.check(&self.active, &key) {
                Admission::Admitted => {}
                Admission::AlreadyActive => continue,
                Admission::AtCapacity => {
                    tracing::debug!(active = self.active.len(), "concurrency cap reached");
                    break;
                }
            }
            match self.start(&mut snapshot, &job, now) {
                Ok(()) => {}
                Err(LaunchError::Link(e)) => {
                    self.queue.remove(&mut snapshot, &key);
                    tracing::warn!(key = %key, "dropping job with invalid link: {}", e);
                }
                Err(e) => {
                    tracing::warn!(key = %key, "launch failed: {}", e);
                    self.queue.schedule_retry(
                        &mut snapshot,
                        &JobSeed::from_job(&job),
                        format!("Launch failed: {}", e),
                        now,
                    );
                }
            }
        }

        self.store.save(&snapshot)?;
        Ok(())
    }

    fn start(
        &mut self,
        snapshot: &mut Snapshot,
        job: &RetryJob,
        now: DateTime<Utc>,
    ) -> Result<(), LaunchError> {
        let seed = JobSeed::from_job(job);
        let dir = job.dir.clone().unwrap_or_else(|| self.default_dir(job));
        let link = validate_link(&job.video_link)?;
        let args = capture_args(&dir, link.as_str(), &self.credentials.tool_args(), &self.extra_flags);
        let id = format!("{}-{}", seed.key, now.timestamp_millis());

        let handle = self.launcher.launch(
            LaunchRequest {
                id: id.clone(),
                program: self.cfg.tools.capture_bin.clone(),
                args,
                dir: dir.clone(),
                kill_grace: self.cfg.kill_grace(),
            },
            self.process_tx.clone(),
        )?;
        tracing::info!(
            download_id = %id,
            key = %seed.key,
            attempts = job.attempts,
            path = %dir.display(),
            "capture started"
        );

        let download = ActiveDownload::new(
            id,
            seed,
            dir,
            handle,
            LineMonitor::new(self.cfg.thresholds.forbidden_loop_lines),
            Instant::now(),
            now,
        );
        if let Err((verdict, download)) = self.queue.admit(snapshot, &mut self.active, download, now) {
            tracing::warn!(download_id = %download.id, ?verdict, "admission refused after launch, stopping");
            download.handle.terminate();
        }
        Ok(())
    }

    /// Working directory for a job that never had one recorded.
    fn default_dir(&self, job: &RetryJob) -> PathBuf {
        let name = if job.title.trim().is_empty() {
            sanitize_title(&job.video_id)
        } else {
            sanitize_title(&job.title)
        };
        self.dispatcher
            .channel_dir(job.username.as_deref(), &job.channel_id)
            .join(name)
    }

    /// Operator cancel: stop the process, drop the job without a retry, and
    /// exclude its title from future scans. Leftover fragments are merged
    /// and the folder is removed later if it turns out empty.
    pub fn cancel(&mut self, download_id: &str) -> Result<()> {
        let download = self
            .active
            .remove(download_id)
            .ok_or_else(|| anyhow!("no active download with id {}", download_id))?;
        download.handle.terminate();

        let mut snapshot = self.store.load()?;
        snapshot.current_downloads.retain(|r| r.id != download_id);
        self.queue.remove(&mut snapshot, download.key());
        snapshot.exclude_title(&download.seed.title);
        self.store.save(&snapshot)?;
        tracing::info!(
            download_id = %download_id,
            title = %download.seed.title,
            "download cancelled, title excluded from future scans"
        );

        let dir = download.dir.clone();
        self.spawn_merge(dir.clone());
        let delay = Duration::from_secs(self.cfg.schedule.cancel_cleanup_delay_secs);
        self.background.spawn(async move {
            tokio::time::sleep(delay).await;
            let target = dir.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                folder::safe_cleanup(&target, "cancelled download")
            })
            .await
            .unwrap_or_else(|e| CleanupOutcome::Failed(e.to_string()));
            BackgroundDone::CancelCleanup { dir, outcome }
        });
        Ok(())
    }

    /// Watchdog timer: stop and reschedule silent processes.
    pub fn watchdog_tick(&mut self) {
        isolate("watchdog", self.watchdog_once());
    }

    fn watchdog_once(&mut self) -> Result<()> {
        let (now_instant, now) = clock();
        if watchdog::find_stuck(&self.active, &self.watchdog, now_instant).is_empty() {
            return Ok(());
        }
        let mut snapshot = self.store.load()?;
        let killed = watchdog::sweep(
            &mut self.active,
            &self.queue,
            &mut snapshot,
            &self.watchdog,
            now_instant,
            now,
        );
        self.store.save(&snapshot)?;
        tracing::info!(killed = killed.len(), "watchdog sweep finished");
        Ok(())
    }
}
