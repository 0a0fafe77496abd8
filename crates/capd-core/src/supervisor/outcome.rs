//! Exit-outcome policy: what to do once a supervised process has terminated.
//!
//! Kept free of I/O so every branch can be tested without spawning anything.

use crate::auth::{classify_auth_failure, AuthReason};
use crate::folder::FolderState;

use super::active::Termination;

const LIVE_NOT_STARTED: &str = "This live event will begin";

/// Facts about a terminated process.
#[derive(Debug, Clone, Copy)]
pub struct ExitContext<'a> {
    pub termination: Termination,
    pub code: Option<i32>,
    pub diagnostics: &'a str,
    pub credentials_usable: bool,
    /// Attempts recorded for this key before the one that just ended.
    pub prior_attempts: u32,
    pub max_auth_failure_attempts: u32,
}

/// Decision for a terminated process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Merge, record history, clear the retry job.
    Success { note: Option<&'static str> },
    /// Another path already settled the job; drop tracking only.
    Bookkeeping,
    /// Auth-required with no credential: drop the job, no history, skip-cache it.
    SkipSilently { reason: AuthReason },
    /// Credentialed auth failure hit the attempt ceiling: permanent history entry.
    Finalize { reason: AuthReason },
    /// Re-enqueue with one more attempt.
    Retry {
        reason: String,
        /// Only ever true for an `Empty` folder.
        remove_dir: bool,
    },
}

/// Apply the policy in priority order. `folder_state` is only evaluated when
/// the decision depends on it.
pub fn decide(ctx: &ExitContext<'_>, folder_state: impl FnOnce() -> FolderState) -> ExitOutcome {
    match ctx.termination {
        Termination::StreamEndedLoop => {
            return ExitOutcome::Success {
                note: Some("stream ended"),
            }
        }
        Termination::WatchdogKilled | Termination::AuthSkipped(_) => {
            return ExitOutcome::Bookkeeping
        }
        Termination::Running => {}
    }

    if ctx.code == Some(0) {
        return ExitOutcome::Success { note: None };
    }

    if let Some(reason) = classify_auth_failure(ctx.diagnostics) {
        if !ctx.credentials_usable {
            return ExitOutcome::SkipSilently { reason };
        }
        let attempts = ctx.prior_attempts.saturating_add(1);
        if attempts >= ctx.max_auth_failure_attempts {
            return ExitOutcome::Finalize { reason };
        }
    }

    let state = folder_state();
    if state == FolderState::Complete {
        return ExitOutcome::Success { note: None };
    }

    let base = if ctx.diagnostics.contains(LIVE_NOT_STARTED) {
        "Live scheduled; retry later"
    } else if state == FolderState::Incomplete {
        "Partial/incomplete download; retry"
    } else {
        "Download failed; retry"
    };
    let code = ctx
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    ExitOutcome::Retry {
        reason: format!("{base} (exit {code})"),
        remove_dir: state == FolderState::Empty,
    }
}
