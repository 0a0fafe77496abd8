use regex::Regex;
use std::sync::LazyLock;

use crate::auth::{classify_auth_failure, AuthReason};

static FORBIDDEN_RETRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Got error: HTTP Error 403.*Retrying fragment").expect("valid 403 regex")
});

/// What a single output line means for the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSignal {
    Nothing,
    /// Threshold of consecutive forbidden-fragment retries reached.
    StreamEnded { consecutive: u32 },
    /// Auth-required message while no credential is usable.
    AuthRequired(AuthReason),
}

/// Per-process line scanner for real-time failure signatures.
///
/// Forbidden-fragment lines are counted across all fragments and streams;
/// any other non-blank line resets the count.
#[derive(Debug, Clone)]
pub struct LineMonitor {
    forbidden_threshold: u32,
    consecutive_forbidden: u32,
}

impl LineMonitor {
    pub fn new(forbidden_threshold: u32) -> Self {
        Self {
            forbidden_threshold: forbidden_threshold.max(1),
            consecutive_forbidden: 0,
        }
    }

    pub fn consecutive_forbidden(&self) -> u32 {
        self.consecutive_forbidden
    }

    pub fn observe(&mut self, line: &str, credentials_usable: bool) -> LineSignal {
        if line.trim().is_empty() {
            return LineSignal::Nothing;
        }
        if FORBIDDEN_RETRY.is_match(line) {
            self.consecutive_forbidden += 1;
            if self.consecutive_forbidden >= self.forbidden_threshold {
                return LineSignal::StreamEnded {
                    consecutive: self.consecutive_forbidden,
                };
            }
            return LineSignal::Nothing;
        }
        self.consecutive_forbidden = 0;

        if !credentials_usable {
            if let Some(reason) = classify_auth_failure(line) {
                return LineSignal::AuthRequired(reason);
            }
        }
        LineSignal::Nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORBIDDEN: &str = "[download] Got error: HTTP Error 403: Forbidden. Retrying fragment 12 (3/50)...";

    #[test]
    fn fires_at_threshold() {
        let mut m = LineMonitor::new(3);
        assert_eq!(m.observe(FORBIDDEN, true), LineSignal::Nothing);
        assert_eq!(m.observe(FORBIDDEN, true), LineSignal::Nothing);
        assert_eq!(
            m.observe(FORBIDDEN, true),
            LineSignal::StreamEnded { consecutive: 3 }
        );
    }

    #[test]
    fn other_output_resets_count_but_blank_does_not() {
        let mut m = LineMonitor::new(3);
        m.observe(FORBIDDEN, true);
        m.observe(FORBIDDEN, true);
        m.observe("   ", true);
        assert_eq!(m.consecutive_forbidden(), 2);
        m.observe("[download] Downloading fragment 13", true);
        assert_eq!(m.consecutive_forbidden(), 0);
        assert_eq!(m.observe(FORBIDDEN, true), LineSignal::Nothing);
    }

    #[test]
    fn auth_only_when_credentials_unusable() {
        let line = "ERROR: Join this channel to get access to members-only content";
        let mut m = LineMonitor::new(100);
        assert_eq!(m.observe(line, true), LineSignal::Nothing);
        assert_eq!(
            m.observe(line, false),
            LineSignal::AuthRequired(AuthReason::MembersOnly)
        );
    }
}
