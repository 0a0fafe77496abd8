//! Types persisted in the store document.
//!
//! Field names are camelCase so the document stays readable by the web UI
//! that shares it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::queue::JobKey;

/// One pending or in-flight capture attempt, keyed by (channel, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryJob {
    /// `"<channelId>-<videoId>"`, for display only. Identity is the
    /// (`channelId`, `videoId`) pair, since both ids may contain `-`.
    pub key: String,
    pub channel_id: String,
    pub video_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    pub video_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: String,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryJob {
    /// A fresh job, due immediately.
    pub fn new(
        key: &JobKey,
        title: impl Into<String>,
        video_link: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.to_string(),
            channel_id: key.channel_id.clone(),
            video_id: key.video_id.clone(),
            title: title.into(),
            username: None,
            channel_name: None,
            video_link: video_link.into(),
            dir: None,
            attempts: 0,
            last_error: String::new(),
            next_attempt_at: now,
            in_progress: false,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(&self.channel_id, &self.video_id)
    }

    pub fn is_for(&self, key: &JobKey) -> bool {
        self.channel_id == key.channel_id && self.video_id == key.video_id
    }
}

/// Partial update merged into a [`RetryJob`]; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub title: Option<String>,
    pub username: Option<String>,
    pub channel_name: Option<String>,
    pub video_link: Option<String>,
    pub dir: Option<PathBuf>,
    pub attempts: Option<u32>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub in_progress: Option<bool>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Persisted view of a supervised process. Processes never survive a restart,
/// so any entry found at startup is an interrupted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightDownload {
    pub id: String,
    #[serde(alias = "channel")]
    pub channel_id: String,
    pub video_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub video_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(alias = "startTime")]
    pub started_at: DateTime<Utc>,
}

/// Completed or permanently skipped capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub title: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// The whole store document.
///
/// Fields owned by other collaborators (channels, UI settings, ...) are kept
/// in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub retry_queue: Vec<RetryJob>,
    #[serde(default)]
    pub current_downloads: Vec<InFlightDownload>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Permanent exclusion list: titles containing any of these are never captured.
    #[serde(default)]
    pub ignore_keywords: Vec<String>,
    /// Optional include filter; empty means every title matches.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Snapshot {
    /// Add a title to the exclusion list unless it is already there.
    pub fn exclude_title(&mut self, title: &str) -> bool {
        if self.ignore_keywords.iter().any(|k| k == title) {
            return false;
        }
        self.ignore_keywords.push(title.to_string());
        true
    }

    /// Case-insensitive substring match against the exclusion list.
    pub fn is_excluded(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.ignore_keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    }

    /// True when no include keywords are set or the title contains one of them.
    pub fn matches_keywords(&self, title: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = title.to_lowercase();
        self.keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }
}
