//! Completion notifications.
//!
//! The orchestrator reports every successful capture to a [`Notifier`].
//! Delivery is fire-and-forget: a notifier must not block the actor, and a
//! failed delivery is only logged.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::config::NotifyConfig;

pub const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

/// A finished capture, as handed to a [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion<'a> {
    pub title: &'a str,
    pub dir: &'a Path,
    /// The capture stopped because the live stream ended, not because the
    /// tool exited on its own.
    pub stream_ended: bool,
}

impl Completion<'_> {
    pub fn message(&self) -> String {
        if self.stream_ended {
            format!("Stream ended: {}", self.title)
        } else {
            format!("Downloaded: {}", self.title)
        }
    }
}

pub trait Notifier: Send + Sync {
    fn download_finished(&self, done: &Completion<'_>);
}

/// Default: notifications disabled.
pub struct NoNotifier;

impl Notifier for NoNotifier {
    fn download_finished(&self, _done: &Completion<'_>) {}
}

/// Posts a message to the Pushover API.
pub struct PushoverNotifier {
    endpoint: String,
    app_token: String,
    user_key: String,
    timeout: Duration,
}

impl PushoverNotifier {
    /// `None` unless both tokens are configured.
    pub fn from_config(cfg: &NotifyConfig) -> Option<Self> {
        let app_token = cfg.pushover_app_token.trim();
        let user_key = cfg.pushover_user_key.trim();
        if app_token.is_empty() || user_key.is_empty() {
            return None;
        }
        Some(Self {
            endpoint: PUSHOVER_ENDPOINT.to_string(),
            app_token: app_token.to_string(),
            user_key: user_key.to_string(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Blocking POST; call from `spawn_blocking`.
    fn post(endpoint: &str, timeout: Duration, fields: &[(&str, &str)]) -> Result<()> {
        let mut easy = curl::easy::Easy::new();
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, easy.url_encode(v.as_bytes())))
            .collect::<Vec<_>>()
            .join("&");
        easy.url(endpoint).context("invalid notification URL")?;
        easy.noproxy("localhost,127.0.0.1")?;
        easy.post(true)?;
        easy.post_fields_copy(body.as_bytes())?;
        easy.connect_timeout(timeout)?;
        easy.timeout(timeout)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| Ok(data.len()))?;
            transfer.perform().context("notification request failed")?;
        }
        let code = easy.response_code().context("no response code")?;
        if !(200..300).contains(&code) {
            bail!("notification endpoint returned HTTP {}", code);
        }
        Ok(())
    }
}

impl Notifier for PushoverNotifier {
    fn download_finished(&self, done: &Completion<'_>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime for notification, dropped");
            return;
        };
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let token = self.app_token.clone();
        let user = self.user_key.clone();
        let title = done.title.to_string();
        let message = done.message();
        runtime.spawn_blocking(move || {
            let fields = [
                ("token", token.as_str()),
                ("user", user.as_str()),
                ("title", title.as_str()),
                ("message", message.as_str()),
            ];
            match Self::post(&endpoint, timeout, &fields) {
                Ok(()) => tracing::debug!(%title, "notification sent"),
                Err(e) => tracing::warn!(%title, "notification failed: {:#}", e),
            }
        });
    }
}
