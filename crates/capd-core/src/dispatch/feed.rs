use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::FeedConfig;
use crate::queue::BackoffPolicy;

use super::FeedItem;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("feed {0} not found")]
    NotFound(String),
    #[error("timed out fetching feed {0}")]
    Timeout(String),
    #[error("connection error fetching feed {source_name}: {message}")]
    Connection { source_name: String, message: String },
    #[error("feed {source_name}: {message}")]
    Other { source_name: String, message: String },
}

impl FeedError {
    /// Timeouts and connection errors are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Timeout(_) | FeedError::Connection { .. })
    }
}

/// Where candidates come from. The orchestrator only sees [`FeedItem`]s.
pub trait FeedSource: Send + Sync {
    /// Human-readable name used in logs and 404 suppression.
    fn name(&self) -> String;
    fn fetch(&self) -> Result<Vec<FeedItem>, FeedError>;
}

/// A JSON array of [`FeedItem`]s on disk, rewritten by some external poller.
#[derive(Debug, Clone)]
pub struct JsonFeedFile {
    path: PathBuf,
}

impl JsonFeedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FeedSource for JsonFeedFile {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Vec<FeedItem>, FeedError> {
        let data = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FeedError::NotFound(self.name()),
            io::ErrorKind::TimedOut => FeedError::Timeout(self.name()),
            _ => FeedError::Other {
                source_name: self.name(),
                message: e.to_string(),
            },
        })?;
        serde_json::from_str(&data).map_err(|e| FeedError::Other {
            source_name: self.name(),
            message: format!("parse: {}", e),
        })
    }
}

/// Backoff for transient fetch errors: `fetch_backoff * 2^attempt`, jittered.
pub fn feed_backoff(cfg: &FeedConfig) -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(cfg.fetch_backoff_ms),
        max_delay: Duration::from_secs(60),
        max_exponent: 10,
        jitter_cap: Duration::from_millis(250),
    }
}

/// Fetch on the blocking pool, retrying transient errors up to `retries`
/// extra times. Not-found and parse errors are returned immediately.
pub async fn fetch_with_retry(
    source: Arc<dyn FeedSource>,
    retries: u32,
    backoff: BackoffPolicy,
) -> Result<Vec<FeedItem>, FeedError> {
    let mut attempt = 0;
    loop {
        let src = Arc::clone(&source);
        let result = tokio::task::spawn_blocking(move || src.fetch())
            .await
            .unwrap_or_else(|e| {
                Err(FeedError::Other {
                    source_name: source.name(),
                    message: format!("fetch task failed: {}", e),
                })
            });
        match result {
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = backoff.jittered_delay(attempt);
                tracing::warn!(
                    feed = %source.name(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient feed error, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Rate-limits "feed not found" warnings to one per source per interval.
#[derive(Debug)]
pub struct NotFoundLog {
    interval: Duration,
    last: HashMap<String, Instant>,
}

impl NotFoundLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// True if a warning for `source` should be emitted now; records it if so.
    pub fn should_log(&mut self, source: &str, now: Instant) -> bool {
        match self.last.get(source) {
            Some(&at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                self.last.insert(source.to_string(), now);
                true
            }
        }
    }

    /// Forget `source` after a successful fetch.
    pub fn clear(&mut self, source: &str) {
        self.last.remove(source);
    }
}

impl Default for NotFoundLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}
