//! `capd status` – show the retry queue, in-flight downloads and history.

use anyhow::Result;
use capd_core::config::CapdConfig;
use capd_core::queue::{BackoffPolicy, RetryQueue};
use capd_core::store::{JsonFileStore, Store};
use chrono::Utc;

pub fn run_status(cfg: &CapdConfig, history: usize) -> Result<()> {
    let store = JsonFileStore::new(cfg.resolved_store_path()?);
    let snapshot = store.load()?;
    let queue = RetryQueue::new(
        BackoffPolicy::from_config(&cfg.retry),
        cfg.max_concurrent_downloads,
    );
    let now = Utc::now();
    let counts = queue.counts(&snapshot, now);

    println!("Retry queue: {} job(s), {} due", counts.total, counts.due);
    if !snapshot.retry_queue.is_empty() {
        println!("{:<28} {:<8} {:<22} {}", "KEY", "ATTEMPTS", "NEXT ATTEMPT", "TITLE");
        for job in &snapshot.retry_queue {
            let next = if job.in_progress {
                "running".to_string()
            } else {
                job.next_attempt_at.format("%Y-%m-%d %H:%M:%S").to_string()
            };
            println!("{:<28} {:<8} {:<22} {}", job.key, job.attempts, next, job.title);
            if !job.last_error.is_empty() {
                println!("{:<28} {}", "", job.last_error);
            }
        }
    }

    println!();
    if snapshot.current_downloads.is_empty() {
        println!("No downloads in flight.");
    } else {
        println!("{:<40} {:<22} {}", "ID", "STARTED", "TITLE");
        for d in &snapshot.current_downloads {
            println!(
                "{:<40} {:<22} {}",
                d.id,
                d.started_at.format("%Y-%m-%d %H:%M:%S"),
                d.title
            );
        }
    }

    if history > 0 && !snapshot.history.is_empty() {
        println!();
        println!("Recent history:");
        for entry in snapshot.history.iter().rev().take(history) {
            let detail = match (&entry.status, &entry.reason, &entry.note) {
                (Some(status), Some(reason), _) => format!("{status}: {reason}"),
                (Some(status), None, _) => status.clone(),
                (None, _, Some(note)) => note.clone(),
                _ => "done".to_string(),
            };
            println!(
                "  {}  {:<24} {}",
                entry.time.format("%Y-%m-%d %H:%M"),
                detail,
                entry.title
            );
        }
    }
    Ok(())
}
