//! `capd enqueue` – run one candidate through the dispatcher.
//!
//! With a daemon running the item goes over the control socket, so the
//! daemon stays the only writer of the store. The store is edited directly
//! only when nothing is listening.

use anyhow::Result;
use capd_core::auth::{AuthSkipCache, CookieFile, CredentialProbe};
use capd_core::config::CapdConfig;
use capd_core::dispatch::{Decision, DispatchContext, Dispatcher, FeedItem};
use capd_core::orchestrator::default_control_socket_path;
use capd_core::queue::{BackoffPolicy, RetryQueue};
use capd_core::store::{JsonFileStore, Store};
use capd_core::supervisor::{validate_link, ActiveTable};
use chrono::Utc;
use std::time::{Duration, Instant};

use crate::cli::control_socket;

pub async fn run_enqueue(cfg: &CapdConfig, item: FeedItem) -> Result<()> {
    validate_link(&item.link)?;
    if let Ok(path) = default_control_socket_path() {
        if control_socket::send_enqueue(&path, &item).await? {
            println!("Sent {} to the running daemon", item.key());
            return Ok(());
        }
    }
    let store = JsonFileStore::new(cfg.resolved_store_path()?);
    let mut snapshot = store.load()?;
    let queue = RetryQueue::new(
        BackoffPolicy::from_config(&cfg.retry),
        cfg.max_concurrent_downloads,
    );
    let dispatcher = Dispatcher::from_config(cfg);
    // No daemon is running, so there are no live downloads to check against.
    let active = ActiveTable::new();
    let mut skip_cache = AuthSkipCache::new(
        Duration::from_secs(cfg.auth.skip_ttl_secs),
        cfg.auth.skip_cache_max,
    );

    let mut ctx = DispatchContext {
        snapshot: &mut snapshot,
        active: &active,
        skip_cache: &mut skip_cache,
        credentials_usable: CookieFile::from_config(&cfg.auth).usable(),
        now: Utc::now(),
        now_instant: Instant::now(),
    };
    let decision = dispatcher.consider(&item, &queue, &mut ctx);
    store.save(&snapshot)?;

    match decision {
        Decision::Enqueued { dir, reused } => {
            let note = if reused { " (reusing existing folder)" } else { "" };
            println!("Enqueued {} -> {}{}", item.key(), dir.display(), note);
        }
        other => println!("Not enqueued: {:?}", other),
    }
    Ok(())
}
