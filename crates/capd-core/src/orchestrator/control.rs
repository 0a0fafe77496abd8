use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::dispatch::FeedItem;

/// Requests accepted by a running orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Stop a download by id; its title is excluded from future scans.
    Cancel(String),
    /// Run a scan cycle now.
    Refresh,
    /// Dispatch these candidates, then sweep the retry queue.
    Ingest(Vec<FeedItem>),
    Shutdown,
}

impl ControlRequest {
    /// Parse one line of the control-socket protocol: `cancel <id>`,
    /// `refresh` or `enqueue <feed item as JSON>`.
    pub fn parse_line(line: &str) -> Result<Self, ControlError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim()),
            None => (line, ""),
        };
        match verb {
            "cancel" if rest.is_empty() => Err(ControlError::MissingArgument("cancel")),
            "cancel" => Ok(ControlRequest::Cancel(rest.to_string())),
            "refresh" => Ok(ControlRequest::Refresh),
            "enqueue" if rest.is_empty() => Err(ControlError::MissingArgument("enqueue")),
            "enqueue" => serde_json::from_str::<FeedItem>(rest)
                .map(|item| ControlRequest::Ingest(vec![item]))
                .map_err(|e| ControlError::InvalidItem(e.to_string())),
            _ => Err(ControlError::UnknownCommand(line.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("orchestrator is not running")]
    Closed,
    #[error("unknown control command: {0:?}")]
    UnknownCommand(String),
    #[error("{0} requires an argument")]
    MissingArgument(&'static str),
    #[error("invalid feed item: {0}")]
    InvalidItem(String),
}

/// The `enqueue` protocol line for `item` (JSON never spans lines).
pub fn enqueue_line(item: &FeedItem) -> serde_json::Result<String> {
    Ok(format!("enqueue {}\n", serde_json::to_string(item)?))
}

/// Cloneable sender side of the orchestrator's request queue.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::UnboundedSender<ControlRequest>) -> Self {
        Self { tx }
    }

    pub fn send(&self, request: ControlRequest) -> Result<(), ControlError> {
        self.tx.send(request).map_err(|_| ControlError::Closed)
    }

    pub fn cancel(&self, download_id: impl Into<String>) -> Result<(), ControlError> {
        self.send(ControlRequest::Cancel(download_id.into()))
    }

    pub fn refresh(&self) -> Result<(), ControlError> {
        self.send(ControlRequest::Refresh)
    }

    pub fn ingest(&self, items: Vec<FeedItem>) -> Result<(), ControlError> {
        self.send(ControlRequest::Ingest(items))
    }

    pub fn shutdown(&self) -> Result<(), ControlError> {
        self.send(ControlRequest::Shutdown)
    }
}

/// Control socket location: `~/.local/state/capd/control.sock`.
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("capd")?;
    Ok(xdg_dirs.get_state_home().join("control.sock"))
}
