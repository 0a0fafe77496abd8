use anyhow::Result;
use std::time::Instant;

use crate::folder;
use crate::notify::Completion;
use crate::queue::JobKey;
use crate::store::HistoryEntry;
use crate::supervisor::{decide, ExitContext, ExitOutcome, LineSignal, OutputStream, ProcessEvent, Termination};

use super::{clock, isolate, Orchestrator};

impl Orchestrator {
    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output {
                id,
                stream,
                line,
                at,
            } => self.on_output(&id, stream, &line, at),
            ProcessEvent::Exited { id, code } => isolate("exit handling", self.on_exit(&id, code)),
        }
    }

    fn on_output(&mut self, id: &str, stream: OutputStream, line: &str, at: Instant) {
        let credentials_usable = self.credentials.usable();
        let Some(download) = self.active.get_mut(id) else {
            return;
        };
        match download.record_output(stream, line, at, credentials_usable) {
            LineSignal::Nothing => {}
            LineSignal::StreamEnded { consecutive } => {
                if download.mark(Termination::StreamEndedLoop) {
                    tracing::warn!(
                        download_id = %id,
                        consecutive,
                        "repeated 403 on fragments, stream has likely ended; stopping capture tool"
                    );
                    download.handle.terminate();
                }
            }
            LineSignal::AuthRequired(reason) => {
                if download.mark(Termination::AuthSkipped(reason)) {
                    tracing::warn!(
                        download_id = %id,
                        reason = reason.as_str(),
                        "authentication required and no usable credentials; stopping capture tool"
                    );
                    download.handle.terminate();
                    let key = download.key().clone();
                    self.skip_cache.mark(&key.video_id, Instant::now());
                    isolate("auth skip", self.drop_job(&key));
                }
            }
        }
    }

    fn on_exit(&mut self, id: &str, code: Option<i32>) -> Result<()> {
        let Some(download) = self.active.remove(id) else {
            tracing::debug!(download_id = %id, "exit for untracked download ignored");
            return Ok(());
        };
        let (now_instant, now) = clock();
        let key = download.key().clone();

        let mut snapshot = self.store.load()?;
        snapshot.current_downloads.retain(|r| r.id != id);

        let ctx = ExitContext {
            termination: download.termination(),
            code,
            diagnostics: download.diagnostics(),
            credentials_usable: self.credentials.usable(),
            prior_attempts: self.queue.attempts(&snapshot, &key),
            max_auth_failure_attempts: self.cfg.max_auth_failure_attempts,
        };
        let complete_min_bytes = self.cfg.thresholds.complete_min_bytes;
        let outcome = decide(&ctx, || folder::inspect(&download.dir, complete_min_bytes));
        tracing::info!(download_id = %id, key = %key, ?code, ?outcome, "capture finished");

        match outcome {
            ExitOutcome::Success { note } => {
                snapshot.history.push(HistoryEntry {
                    title: download.seed.title.clone(),
                    time: now,
                    status: None,
                    reason: None,
                    note: note.map(str::to_string),
                    video_id: Some(key.video_id.clone()),
                    channel_id: Some(key.channel_id.clone()),
                });
                self.queue.remove(&mut snapshot, &key);
                self.store.save(&snapshot)?;
                self.notifier.download_finished(&Completion {
                    title: &download.seed.title,
                    dir: &download.dir,
                    stream_ended: download.termination() == Termination::StreamEndedLoop,
                });
                self.spawn_merge(download.dir.clone());
            }
            ExitOutcome::Bookkeeping => {
                self.store.save(&snapshot)?;
            }
            ExitOutcome::SkipSilently { reason } => {
                self.queue.remove(&mut snapshot, &key);
                self.skip_cache.mark(&key.video_id, now_instant);
                self.store.save(&snapshot)?;
                tracing::info!(key = %key, reason = reason.as_str(), "auth required without credentials, skipped");
            }
            ExitOutcome::Finalize { reason } => {
                self.queue.remove(&mut snapshot, &key);
                snapshot.history.push(HistoryEntry {
                    title: download.seed.title.clone(),
                    time: now,
                    status: Some("skipped".to_string()),
                    reason: Some(reason.history_reason()),
                    note: None,
                    video_id: Some(key.video_id.clone()),
                    channel_id: Some(key.channel_id.clone()),
                });
                self.store.save(&snapshot)?;
                tracing::warn!(key = %key, reason = reason.as_str(), "auth failures hit the attempt ceiling, giving up");
            }
            ExitOutcome::Retry { reason, remove_dir } => {
                let job = self.queue.schedule_retry(&mut snapshot, &download.seed, reason, now);
                self.store.save(&snapshot)?;
                tracing::info!(
                    key = %key,
                    attempts = job.attempts,
                    next_attempt_at = %job.next_attempt_at,
                    "{}",
                    job.last_error
                );
                if remove_dir {
                    folder::safe_cleanup(&download.dir, "failed attempt left an empty folder");
                }
            }
        }
        Ok(())
    }

    fn drop_job(&mut self, key: &JobKey) -> Result<()> {
        let mut snapshot = self.store.load()?;
        if self.queue.remove(&mut snapshot, key).is_some() {
            self.store.save(&snapshot)?;
        }
        Ok(())
    }
}
