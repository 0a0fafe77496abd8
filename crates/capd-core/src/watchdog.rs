//! Stuck-process watchdog.
//!
//! Runs on its own timer. A process past its grace period that has been
//! silent on both pipes for too long is marked, terminated and rescheduled
//! right away, without waiting for its exit.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::config::WatchdogConfig;
use crate::queue::RetryQueue;
use crate::store::Snapshot;
use crate::supervisor::{ActiveTable, Termination};

#[derive(Debug, Clone, Copy)]
pub struct WatchdogPolicy {
    pub no_output: Duration,
    pub min_runtime: Duration,
}

impl WatchdogPolicy {
    pub fn from_config(cfg: &WatchdogConfig) -> Self {
        Self {
            no_output: Duration::from_secs(cfg.no_output_secs),
            min_runtime: Duration::from_secs(cfg.min_runtime_secs),
        }
    }
}

/// A process the watchdog decided to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckProcess {
    pub id: String,
    pub quiet: Duration,
}

/// Pure selection: which running processes are stuck at `now`.
pub fn find_stuck(active: &ActiveTable, policy: &WatchdogPolicy, now: Instant) -> Vec<StuckProcess> {
    let mut stuck: Vec<StuckProcess> = active
        .iter()
        .filter(|d| d.termination() == Termination::Running && !d.handle.has_exited())
        .filter(|d| d.runtime(now) >= policy.min_runtime)
        .filter(|d| d.quiet_for(now) >= policy.no_output)
        .map(|d| StuckProcess {
            id: d.id.clone(),
            quiet: d.quiet_for(now),
        })
        .collect();
    stuck.sort_by(|a, b| a.id.cmp(&b.id));
    stuck
}

/// Mark, terminate and reschedule every stuck process. The caller persists
/// `snapshot` afterwards. Returns what was killed.
pub fn sweep(
    active: &mut ActiveTable,
    queue: &RetryQueue,
    snapshot: &mut Snapshot,
    policy: &WatchdogPolicy,
    now: Instant,
    now_wall: DateTime<Utc>,
) -> Vec<StuckProcess> {
    let stuck = find_stuck(active, policy, now);
    for s in &stuck {
        let Some(download) = active.get_mut(&s.id) else {
            continue;
        };
        download.mark(Termination::WatchdogKilled);
        tracing::error!(
            download_id = %s.id,
            title = %download.seed.title,
            "watchdog: killing stuck capture tool (no output for {}s)",
            s.quiet.as_secs()
        );
        download.handle.terminate();
        let job = queue.schedule_retry(
            snapshot,
            &download.seed,
            format!("Watchdog killed process (quiet {}s)", s.quiet.as_secs()),
            now_wall,
        );
        tracing::info!(
            key = %job.key,
            attempts = job.attempts,
            next_attempt_at = %job.next_attempt_at,
            "rescheduled after watchdog kill"
        );
    }
    stuck
}
