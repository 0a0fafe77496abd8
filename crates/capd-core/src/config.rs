use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::args::validate_extra_flags;

/// Upper bound for `[retry].max_delay_secs` (one year).
pub const MAX_RETRY_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

/// Retry queue backoff parameters (`[retry]` in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Exponent cap so `base * 2^attempts` never overflows.
    pub max_exponent: u32,
    /// Upper bound on the random perturbation added to each delay, in milliseconds.
    pub jitter_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 120,
            max_delay_secs: 3600,
            max_exponent: 10,
            jitter_cap_ms: 250,
        }
    }
}

/// Stuck-process watchdog (`[watchdog]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Sweep period in seconds.
    pub interval_secs: u64,
    /// A process silent for this long (stdout and stderr) is considered stuck.
    pub no_output_secs: u64,
    /// Grace period after launch during which a process is never killed.
    pub min_runtime_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            // Live streams can sit in a waiting room for a long time.
            no_output_secs: 2 * 60 * 60,
            min_runtime_secs: 10 * 60,
        }
    }
}

/// Credential material and the auth-skip cache (`[auth]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Operator switch; the cookie file must also exist for credentials to be usable.
    pub use_cookies: bool,
    /// Netscape-format cookie file passed to the capture tool.
    pub cookies_path: Option<PathBuf>,
    /// How long an auth-required video stays suppressed when no credential is usable.
    pub skip_ttl_secs: u64,
    /// Size cap for the in-memory skip cache.
    pub skip_cache_max: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            use_cookies: false,
            cookies_path: None,
            skip_ttl_secs: 7 * 24 * 60 * 60,
            skip_cache_max: 2000,
        }
    }
}

/// External tool binaries and flags (`[tools]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub capture_bin: PathBuf,
    pub merge_bin: PathBuf,
    /// Extra capture-tool flags appended after the built-in ones. Validated on load.
    pub extra_flags: String,
    /// Seconds between SIGTERM and a forced kill.
    pub kill_grace_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            capture_bin: PathBuf::from("yt-dlp"),
            merge_bin: PathBuf::from("ffmpeg"),
            extra_flags: String::new(),
            kill_grace_secs: 30,
        }
    }
}

/// Timer periods for the daemon loop (`[schedule]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scan_interval_secs: u64,
    pub retry_sweep_secs: u64,
    /// Delay before a cancelled job's folder is inspected for cleanup.
    pub cancel_cleanup_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 600,
            retry_sweep_secs: 60,
            cancel_cleanup_delay_secs: 10,
        }
    }
}

/// Folder date prefix style used when naming new working directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "YYYY-MM-DD")]
    YearFirst,
    #[serde(rename = "MM-DD-YYYY")]
    MonthFirst,
}

/// Feed polling (`[feed]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Retries after the first attempt for transient fetch errors.
    pub fetch_retries: u32,
    pub fetch_backoff_ms: u64,
    pub date_format: DateFormat,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            fetch_retries: 3,
            fetch_backoff_ms: 1000,
            date_format: DateFormat::YearFirst,
        }
    }
}

/// Completion notifications (`[notify]`). Disabled unless both Pushover
/// tokens are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub pushover_app_token: String,
    pub pushover_user_key: String,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            pushover_app_token: String::new(),
            pushover_user_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Tunable heuristics (`[thresholds]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Consecutive "403 ... Retrying fragment" lines that mean the live stream is over.
    pub forbidden_loop_lines: u32,
    /// A final video must exceed this size for the folder to count as complete.
    pub complete_min_bytes: u64,
    /// Fragments below this size are deleted after a failed merge.
    pub corrupt_fragment_bytes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            forbidden_loop_lines: 100,
            complete_min_bytes: 1024 * 1024,
            corrupt_fragment_bytes: 1024,
        }
    }
}

/// Global configuration loaded from `~/.config/capd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapdConfig {
    /// Root of all per-channel working directories.
    pub download_dir: PathBuf,
    /// Store document; defaults to `~/.local/state/capd/db.json`.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Optional JSON feed file polled on every scan cycle.
    #[serde(default)]
    pub feed_file: Option<PathBuf>,
    /// Global cap on concurrently supervised capture processes (0 = unbounded).
    #[serde(default)]
    pub max_concurrent_downloads: usize,
    /// Attempts before a credentialed auth failure is finalized as skipped.
    #[serde(default = "default_max_auth_failure_attempts")]
    pub max_auth_failure_attempts: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_max_auth_failure_attempts() -> u32 {
    3
}

impl Default for CapdConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("download"),
            store_path: None,
            feed_file: None,
            max_concurrent_downloads: 0,
            max_auth_failure_attempts: default_max_auth_failure_attempts(),
            retry: RetryConfig::default(),
            watchdog: WatchdogConfig::default(),
            auth: AuthConfig::default(),
            tools: ToolsConfig::default(),
            schedule: ScheduleConfig::default(),
            feed: FeedConfig::default(),
            thresholds: Thresholds::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl CapdConfig {
    /// Reject configurations that would be unsafe to run (denylisted tool flags).
    pub fn validate(&self) -> Result<()> {
        validate_extra_flags(&self.tools.extra_flags).context("invalid [tools].extra_flags")?;
        if self.retry.max_delay_secs > MAX_RETRY_DELAY_SECS {
            bail!(
                "[retry].max_delay_secs = {} exceeds the limit of {}",
                self.retry.max_delay_secs,
                MAX_RETRY_DELAY_SECS
            );
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog.interval_secs.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.tools.kill_grace_secs)
    }

    /// Store location: explicit `store_path`, else the XDG state dir.
    pub fn resolved_store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(p) => Ok(p.clone()),
            None => crate::store::default_store_path(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("capd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<CapdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CapdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load and validate configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<CapdConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: CapdConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = CapdConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 0);
        assert_eq!(cfg.max_auth_failure_attempts, 3);
        assert_eq!(cfg.retry.base_delay_secs, 120);
        assert_eq!(cfg.retry.max_delay_secs, 3600);
        assert_eq!(cfg.watchdog.no_output_secs, 7200);
        assert_eq!(cfg.thresholds.forbidden_loop_lines, 100);
        assert_eq!(cfg.thresholds.complete_min_bytes, 1_048_576);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = CapdConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: CapdConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.download_dir, cfg.download_dir);
        assert_eq!(parsed.retry.max_exponent, cfg.retry.max_exponent);
        assert_eq!(parsed.feed.date_format, DateFormat::YearFirst);
    }

    #[test]
    fn config_toml_partial_sections_fill_defaults() {
        let toml = r#"
            download_dir = "/srv/capture"
            max_concurrent_downloads = 4

            [watchdog]
            no_output_secs = 900

            [feed]
            date_format = "MM-DD-YYYY"

            [notify]
            pushover_app_token = "a1"
        "#;
        let cfg: CapdConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.download_dir, PathBuf::from("/srv/capture"));
        assert_eq!(cfg.max_concurrent_downloads, 4);
        assert_eq!(cfg.watchdog.no_output_secs, 900);
        assert_eq!(cfg.watchdog.min_runtime_secs, 600);
        assert_eq!(cfg.feed.date_format, DateFormat::MonthFirst);
        assert_eq!(cfg.max_auth_failure_attempts, 3);
        assert!(cfg.store_path.is_none());
        assert_eq!(cfg.notify.pushover_app_token, "a1");
        assert!(cfg.notify.pushover_user_key.is_empty());
        assert_eq!(cfg.notify.timeout_secs, 10);
    }

    #[test]
    fn denylisted_extra_flags_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            download_dir = "d"
            [tools]
            extra_flags = "--embed-subs --exec 'rm -rf ~'"
            "#,
        )
        .unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("--exec"));
    }

    #[test]
    fn oversized_retry_delay_fails_validation() {
        let mut cfg = CapdConfig::default();
        cfg.retry.max_delay_secs = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("max_delay_secs"));

        cfg.retry.max_delay_secs = MAX_RETRY_DELAY_SECS;
        assert!(cfg.validate().is_ok());
    }
}
