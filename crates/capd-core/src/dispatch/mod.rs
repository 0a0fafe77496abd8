//! Dispatcher: turns feed candidates into retry-queue entries.
//!
//! A candidate is enqueued only if it survives the exclusion list, the
//! optional include filter, the auth-skip cache, the active-process check and
//! the folder check. Launching is left to the retry queue.

mod feed;

pub use feed::{feed_backoff, fetch_with_retry, FeedError, FeedSource, JsonFeedFile, NotFoundLog};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use crate::auth::AuthSkipCache;
use crate::config::{CapdConfig, DateFormat};
use crate::folder::{self, FolderState};
use crate::queue::{JobKey, JobSeed, RetryQueue};
use crate::store::{JobUpdate, Snapshot};
use crate::supervisor::ActiveTable;

static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\d{2,4}-\d{2}-\d{2,4}\]\s*").expect("valid date prefix regex"));

/// One candidate from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub channel_id: String,
    pub video_id: String,
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<DateTime<Utc>>,
    /// Channel handle; names the channel's folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
}

impl FeedItem {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.channel_id, &self.video_id)
    }
}

/// Why a candidate was or was not enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Excluded,
    NotMatched,
    AuthSkipped,
    Active,
    AlreadyComplete,
    /// A retry job already exists; its schedule is left alone.
    AlreadyQueued,
    Enqueued { dir: PathBuf, reused: bool },
}

/// Mutable state a dispatch pass works against.
pub struct DispatchContext<'a> {
    pub snapshot: &'a mut Snapshot,
    pub active: &'a ActiveTable,
    pub skip_cache: &'a mut AuthSkipCache,
    pub credentials_usable: bool,
    pub now: DateTime<Utc>,
    pub now_instant: Instant,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    download_dir: PathBuf,
    date_format: DateFormat,
    complete_min_bytes: u64,
}

impl Dispatcher {
    pub fn new(download_dir: PathBuf, date_format: DateFormat, complete_min_bytes: u64) -> Self {
        Self {
            download_dir,
            date_format,
            complete_min_bytes,
        }
    }

    pub fn from_config(cfg: &CapdConfig) -> Self {
        Self::new(
            cfg.download_dir.clone(),
            cfg.feed.date_format,
            cfg.thresholds.complete_min_bytes,
        )
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// `<download_dir>/<username or channel id>`.
    pub fn channel_dir(&self, username: Option<&str>, channel_id: &str) -> PathBuf {
        let name = username
            .map(sanitize_title)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| sanitize_title(channel_id));
        self.download_dir.join(name)
    }

    /// `[<date>] <sanitized title>`; the date falls back to `now` when the
    /// feed gives none.
    pub fn folder_name(&self, title: &str, uploaded: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
        let date = uploaded.unwrap_or(now);
        let prefix = match self.date_format {
            DateFormat::YearFirst => date.format("%Y-%m-%d"),
            DateFormat::MonthFirst => date.format("%m-%d-%Y"),
        };
        format!("[{}] {}", prefix, sanitize_title(title))
    }

    /// Run one candidate through the filters and enqueue it if it survives.
    pub fn consider(
        &self,
        item: &FeedItem,
        queue: &RetryQueue,
        ctx: &mut DispatchContext<'_>,
    ) -> Decision {
        if ctx.snapshot.is_excluded(&item.title) {
            return Decision::Excluded;
        }
        if !ctx.snapshot.matches_keywords(&item.title) {
            return Decision::NotMatched;
        }
        if !ctx.credentials_usable && ctx.skip_cache.is_skipped(&item.video_id, ctx.now_instant) {
            return Decision::AuthSkipped;
        }
        if ctx.active.has_channel_title(&item.channel_id, &item.title) {
            return Decision::Active;
        }

        let channel_dir = self.channel_dir(item.username.as_deref(), &item.channel_id);
        let mut reused = false;
        let dir = match self.find_existing(&channel_dir, &item.title) {
            Existing::Complete => return Decision::AlreadyComplete,
            Existing::Resume(dir) => {
                reused = true;
                dir
            }
            Existing::None => channel_dir.join(self.folder_name(&item.title, item.uploaded, ctx.now)),
        };

        let key = item.key();
        if queue.get(ctx.snapshot, &key).is_some() {
            return Decision::AlreadyQueued;
        }

        let seed = JobSeed {
            key,
            title: item.title.clone(),
            username: item.username.clone(),
            channel_name: item.channel_name.clone().or_else(|| item.username.clone()),
            video_link: item.link.clone(),
            dir: Some(dir.clone()),
        };
        queue.upsert(
            ctx.snapshot,
            &seed,
            JobUpdate {
                next_attempt_at: Some(ctx.now),
                in_progress: Some(false),
                ..JobUpdate::default()
            },
            ctx.now,
        );
        tracing::info!(key = %seed.key, title = %item.title, path = %dir.display(), reused, "enqueued");
        Decision::Enqueued { dir, reused }
    }

    /// Look for a folder in `channel_dir` whose name (date prefix ignored)
    /// equals the sanitized title. Empty matches are removed on the way.
    fn find_existing(&self, channel_dir: &Path, title: &str) -> Existing {
        let wanted = sanitize_title(title);
        let Ok(read) = fs::read_dir(channel_dir) else {
            return Existing::None;
        };
        let mut dirs: Vec<PathBuf> = read
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if strip_date_prefix(&name) != wanted {
                continue;
            }
            match folder::inspect(&dir, self.complete_min_bytes) {
                FolderState::Complete => return Existing::Complete,
                FolderState::Incomplete | FolderState::Metadata => return Existing::Resume(dir),
                FolderState::Empty => {
                    tracing::info!(path = %dir.display(), "removing empty folder");
                    folder::safe_cleanup(&dir, "empty folder for new candidate");
                }
                FolderState::Missing => {}
            }
        }
        Existing::None
    }
}

enum Existing {
    None,
    Complete,
    Resume(PathBuf),
}

/// Strip characters that are invalid in file names on common platforms.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// `"[2024-05-01] Title"` -> `"Title"`; names without a date prefix are returned as is.
pub fn strip_date_prefix(name: &str) -> &str {
    match DATE_PREFIX.find(name) {
        Some(m) => &name[m.end()..],
        None => name,
    }
}

#[cfg(test)]
mod tests;
