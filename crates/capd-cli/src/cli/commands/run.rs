//! `capd run` – the daemon loop.

use anyhow::Result;
use capd_core::auth::CookieFile;
use capd_core::config::CapdConfig;
use capd_core::dispatch::{FeedSource, JsonFeedFile};
use capd_core::merge::FfmpegMerge;
use capd_core::notify::PushoverNotifier;
use capd_core::orchestrator::{default_control_socket_path, Collaborators, Orchestrator};
use capd_core::store::JsonFileStore;
use capd_core::supervisor::ToolLauncher;
use std::sync::Arc;

use crate::cli::control_socket;

pub async fn run_daemon(cfg: CapdConfig) -> Result<()> {
    let store_path = cfg.resolved_store_path()?;
    tracing::info!(path = %store_path.display(), "using store");
    let feed: Option<Arc<dyn FeedSource>> = cfg
        .feed_file
        .as_ref()
        .map(|p| Arc::new(JsonFeedFile::new(p)) as Arc<dyn FeedSource>);
    let deps = Collaborators {
        store: Arc::new(JsonFileStore::new(store_path)),
        launcher: Arc::new(ToolLauncher),
        credentials: Arc::new(CookieFile::from_config(&cfg.auth)),
        merge_tool: Arc::new(FfmpegMerge::new(cfg.tools.merge_bin.clone())),
        feed,
    };
    let notifier = PushoverNotifier::from_config(&cfg.notify);
    let mut orch = Orchestrator::new(cfg, deps)?;
    if let Some(notifier) = notifier {
        tracing::info!("completion notifications enabled");
        orch = orch.with_notifier(Arc::new(notifier));
    }
    let control = orch.control();

    let socket_path = default_control_socket_path().ok();
    if let Some(path) = &socket_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if control_socket::spawn_control_listener(control.clone(), path).is_ok() {
            tracing::debug!(path = %path.display(), "control socket listening");
        }
    }

    let shutdown = control.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown.shutdown();
    });

    println!("capd running; Ctrl-C to stop.");
    let result = orch.run().await;

    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
