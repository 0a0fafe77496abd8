use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::store::{InFlightDownload, JobUpdate, RetryJob, Snapshot};
use crate::supervisor::{ActiveDownload, ActiveTable};

use super::backoff::BackoffPolicy;
use super::key::JobKey;

/// Descriptive fields of a job, as known by whoever enqueues or reschedules it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSeed {
    pub key: JobKey,
    pub title: String,
    pub username: Option<String>,
    pub channel_name: Option<String>,
    pub video_link: String,
    pub dir: Option<PathBuf>,
}

impl JobSeed {
    pub fn from_job(job: &RetryJob) -> Self {
        Self {
            key: job.job_key(),
            title: job.title.clone(),
            username: job.username.clone(),
            channel_name: job.channel_name.clone(),
            video_link: job.video_link.clone(),
            dir: job.dir.clone(),
        }
    }

    fn descriptive_update(&self) -> JobUpdate {
        JobUpdate {
            title: Some(self.title.clone()),
            username: self.username.clone(),
            channel_name: self.channel_name.clone(),
            video_link: Some(self.video_link.clone()),
            dir: self.dir.clone(),
            ..JobUpdate::default()
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Global concurrency cap reached.
    AtCapacity,
    /// A process for the same (channel, video) is already supervised.
    AlreadyActive,
}

/// Queue size summary for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    pub total: usize,
    pub due: usize,
}

/// Backoff schedule plus the global concurrency cap (0 = unbounded).
#[derive(Debug, Clone)]
pub struct RetryQueue {
    backoff: BackoffPolicy,
    max_concurrent: usize,
}

impl RetryQueue {
    pub fn new(backoff: BackoffPolicy, max_concurrent: usize) -> Self {
        Self {
            backoff,
            max_concurrent,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Insert or merge `update` into the job for `seed.key`. Descriptive fields
    /// and `update` are last-write-wins; `attempts` never decreases.
    /// `updatedAt` is always refreshed.
    pub fn upsert(
        &self,
        snapshot: &mut Snapshot,
        seed: &JobSeed,
        update: JobUpdate,
        now: DateTime<Utc>,
    ) -> RetryJob {
        let idx = match snapshot.retry_queue.iter().position(|j| j.is_for(&seed.key)) {
            Some(i) => i,
            None => {
                snapshot
                    .retry_queue
                    .push(RetryJob::new(&seed.key, &seed.title, &seed.video_link, now));
                snapshot.retry_queue.len() - 1
            }
        };
        let job = &mut snapshot.retry_queue[idx];
        apply_update(job, seed.descriptive_update());
        apply_update(job, update);
        job.updated_at = now;
        job.clone()
    }

    pub fn get<'a>(&self, snapshot: &'a Snapshot, key: &JobKey) -> Option<&'a RetryJob> {
        snapshot.retry_queue.iter().find(|j| j.is_for(key))
    }

    pub fn attempts(&self, snapshot: &Snapshot, key: &JobKey) -> u32 {
        self.get(snapshot, key).map(|j| j.attempts).unwrap_or(0)
    }

    pub fn remove(&self, snapshot: &mut Snapshot, key: &JobKey) -> Option<RetryJob> {
        let idx = snapshot.retry_queue.iter().position(|j| j.is_for(key))?;
        Some(snapshot.retry_queue.remove(idx))
    }

    /// Jobs not in progress whose `nextAttemptAt <= now`, oldest-due first.
    pub fn due_jobs(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<RetryJob> {
        let mut due: Vec<RetryJob> = snapshot
            .retry_queue
            .iter()
            .filter(|j| !j.in_progress && j.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_attempt_at);
        due
    }

    pub fn counts(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> QueueCounts {
        QueueCounts {
            total: snapshot.retry_queue.len(),
            due: snapshot
                .retry_queue
                .iter()
                .filter(|j| !j.in_progress && j.next_attempt_at <= now)
                .count(),
        }
    }

    /// Would `key` be admitted right now? Does not change anything.
    pub fn check(&self, active: &ActiveTable, key: &JobKey) -> Admission {
        if active.contains_key(key) {
            return Admission::AlreadyActive;
        }
        if self.max_concurrent != 0 && active.len() >= self.max_concurrent {
            return Admission::AtCapacity;
        }
        Admission::Admitted
    }

    /// Admit a launched download: insert it into the active table and mark the
    /// job in progress (plus its in-flight record) in the same step.
    /// On rejection nothing is changed and the download is handed back.
    pub fn admit(
        &self,
        snapshot: &mut Snapshot,
        active: &mut ActiveTable,
        download: ActiveDownload,
        now: DateTime<Utc>,
    ) -> Result<(), (Admission, Box<ActiveDownload>)> {
        let verdict = self.check(active, &download.seed.key);
        if verdict != Admission::Admitted {
            return Err((verdict, Box::new(download)));
        }
        self.upsert(
            snapshot,
            &download.seed,
            JobUpdate {
                in_progress: Some(true),
                last_attempt_at: Some(now),
                ..JobUpdate::default()
            },
            now,
        );
        snapshot.current_downloads.retain(|d| d.id != download.id);
        snapshot.current_downloads.push(download.in_flight_record());
        active.insert(download);
        Ok(())
    }

    /// Re-enqueue after a failed attempt: attempts + 1, backed-off schedule,
    /// not in progress.
    pub fn schedule_retry(
        &self,
        snapshot: &mut Snapshot,
        seed: &JobSeed,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> RetryJob {
        let attempts = self.attempts(snapshot, &seed.key).saturating_add(1);
        self.upsert(
            snapshot,
            seed,
            JobUpdate {
                attempts: Some(attempts),
                last_error: Some(reason.into()),
                next_attempt_at: Some(self.backoff.next_attempt_at(now, attempts)),
                in_progress: Some(false),
                ..JobUpdate::default()
            },
            now,
        )
    }

    /// Reset `inProgress` on jobs that have no live process. Returns the number reset.
    pub fn repair_stale(
        &self,
        snapshot: &mut Snapshot,
        active: &ActiveTable,
        now: DateTime<Utc>,
    ) -> usize {
        let mut reset = 0;
        for job in snapshot.retry_queue.iter_mut() {
            if job.in_progress && !active.contains_key(&job.job_key()) {
                job.in_progress = false;
                job.updated_at = now;
                reset += 1;
            }
        }
        reset
    }

    /// Keep one job per key (the most recently updated). Returns the number dropped.
    pub fn dedupe(&self, snapshot: &mut Snapshot) -> usize {
        let before = snapshot.retry_queue.len();
        let mut newest: HashMap<JobKey, usize> = HashMap::new();
        for (i, job) in snapshot.retry_queue.iter().enumerate() {
            match newest.get(&job.job_key()) {
                Some(&j) if snapshot.retry_queue[j].updated_at >= job.updated_at => {}
                _ => {
                    newest.insert(job.job_key(), i);
                }
            }
        }
        let mut idx = 0;
        snapshot.retry_queue.retain(|job| {
            let keep = newest.get(&job.job_key()) == Some(&idx);
            idx += 1;
            keep
        });
        before - snapshot.retry_queue.len()
    }

    /// Convert in-flight records left by a previous process into due retry
    /// jobs and clear `currentDownloads`. Returns the number recovered.
    pub fn recover_interrupted(&self, snapshot: &mut Snapshot, now: DateTime<Utc>) -> usize {
        let stale: Vec<InFlightDownload> = std::mem::take(&mut snapshot.current_downloads);
        let mut recovered = 0;
        for record in stale {
            if record.channel_id.is_empty() || record.video_id.is_empty() {
                continue;
            }
            let key = JobKey::new(&record.channel_id, &record.video_id);
            let video_link = if record.video_link.is_empty() {
                format!("https://www.youtube.com/watch?v={}", record.video_id)
            } else {
                record.video_link.clone()
            };
            let seed = JobSeed {
                key,
                title: record.title.clone(),
                username: record.username.clone(),
                channel_name: record.channel_name.clone().or_else(|| record.username.clone()),
                video_link,
                dir: record.dir.clone(),
            };
            self.upsert(
                snapshot,
                &seed,
                JobUpdate {
                    last_error: Some("Recovered after restart".to_string()),
                    next_attempt_at: Some(now),
                    in_progress: Some(false),
                    ..JobUpdate::default()
                },
                now,
            );
            recovered += 1;
        }
        recovered
    }
}

fn apply_update(job: &mut RetryJob, update: JobUpdate) {
    if let Some(v) = update.title {
        job.title = v;
    }
    if let Some(v) = update.username {
        job.username = Some(v);
    }
    if let Some(v) = update.channel_name {
        job.channel_name = Some(v);
    }
    if let Some(v) = update.video_link {
        job.video_link = v;
    }
    if let Some(v) = update.dir {
        job.dir = Some(v);
    }
    if let Some(v) = update.attempts {
        job.attempts = job.attempts.max(v);
    }
    if let Some(v) = update.last_error {
        job.last_error = v;
    }
    if let Some(v) = update.next_attempt_at {
        job.next_attempt_at = v;
    }
    if let Some(v) = update.in_progress {
        job.in_progress = v;
    }
    if let Some(v) = update.last_attempt_at {
        job.last_attempt_at = Some(v);
    }
}
