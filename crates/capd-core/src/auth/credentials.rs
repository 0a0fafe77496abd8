use std::path::PathBuf;

use crate::config::AuthConfig;

/// Answers "is a credential usable right now" and supplies the capture-tool
/// arguments that present it.
pub trait CredentialProbe: Send + Sync {
    fn usable(&self) -> bool;
    fn tool_args(&self) -> Vec<String>;
}

/// Cookie file credential: usable only if enabled by the operator and the
/// file exists when checked.
#[derive(Debug, Clone)]
pub struct CookieFile {
    enabled: bool,
    path: Option<PathBuf>,
}

impl CookieFile {
    pub fn new(enabled: bool, path: Option<PathBuf>) -> Self {
        Self { enabled, path }
    }

    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self::new(cfg.use_cookies, cfg.cookies_path.clone())
    }
}

impl CredentialProbe for CookieFile {
    fn usable(&self) -> bool {
        self.enabled && self.path.as_ref().is_some_and(|p| p.is_file())
    }

    fn tool_args(&self) -> Vec<String> {
        match &self.path {
            Some(p) if self.usable() => vec!["--cookies".to_string(), p.display().to_string()],
            _ => Vec::new(),
        }
    }
}

/// No credential material at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProbe for NoCredentials {
    fn usable(&self) -> bool {
        false
    }

    fn tool_args(&self) -> Vec<String> {
        Vec::new()
    }
}
