use std::fmt;

/// Why the capture tool refused a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthReason {
    PrivateVideo,
    MembersOnly,
    AgeRestricted,
}

impl AuthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthReason::PrivateVideo => "private_video",
            AuthReason::MembersOnly => "members_only",
            AuthReason::AgeRestricted => "age_restricted",
        }
    }

    /// History `reason` recorded when a credentialed attempt is given up.
    pub fn history_reason(&self) -> String {
        format!("auth_failed_{}", self.as_str())
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Match {
    /// Every needle must be present.
    All(&'static [&'static str]),
    /// Any needle is enough.
    Any(&'static [&'static str]),
}

struct AuthRule {
    needles: Match,
    reason: AuthReason,
}

// Needles are lowercase; input is case-folded before matching. First hit wins.
const RULES: &[AuthRule] = &[
    // Without cookies: "Private video. Sign in if you've been granted access"
    AuthRule {
        needles: Match::All(&["private video", "sign in"]),
        reason: AuthReason::PrivateVideo,
    },
    // With cookies the same condition reads "Video unavailable. This video is private"
    AuthRule {
        needles: Match::All(&["video unavailable", "this video is private"]),
        reason: AuthReason::PrivateVideo,
    },
    AuthRule {
        needles: Match::All(&["this video is available to this channel's members"]),
        reason: AuthReason::MembersOnly,
    },
    AuthRule {
        needles: Match::All(&["join this channel", "access"]),
        reason: AuthReason::MembersOnly,
    },
    AuthRule {
        needles: Match::All(&["sign in", "you've been granted access"]),
        reason: AuthReason::PrivateVideo,
    },
    AuthRule {
        needles: Match::Any(&["confirm your age", "age-restricted"]),
        reason: AuthReason::AgeRestricted,
    },
];

/// Classify capture-tool diagnostics. `None` means "not an auth failure".
pub fn classify_auth_failure(text: &str) -> Option<AuthReason> {
    if text.is_empty() {
        return None;
    }
    let folded = text.to_lowercase();
    RULES
        .iter()
        .find(|rule| match rule.needles {
            Match::All(needles) => needles.iter().all(|n| folded.contains(n)),
            Match::Any(needles) => needles.iter().any(|n| folded.contains(n)),
        })
        .map(|rule| rule.reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_video_both_phrasings() {
        let without_cookies =
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access to this video";
        let with_cookies = "ERROR: [youtube] abc: Video unavailable. This video is private";
        assert_eq!(
            classify_auth_failure(without_cookies),
            Some(AuthReason::PrivateVideo)
        );
        assert_eq!(
            classify_auth_failure(with_cookies),
            Some(AuthReason::PrivateVideo)
        );
    }

    #[test]
    fn members_only_phrasings() {
        assert_eq!(
            classify_auth_failure(
                "ERROR: This video is available to this channel's members on level: Tier 1"
            ),
            Some(AuthReason::MembersOnly)
        );
        assert_eq!(
            classify_auth_failure("Join this channel to get access to members-only content"),
            Some(AuthReason::MembersOnly)
        );
    }

    #[test]
    fn age_restricted() {
        assert_eq!(
            classify_auth_failure("Sign in to confirm your age. This video may be inappropriate"),
            Some(AuthReason::AgeRestricted)
        );
        assert_eq!(
            classify_auth_failure("WARNING: age-restricted content"),
            Some(AuthReason::AgeRestricted)
        );
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(
            classify_auth_failure("PRIVATE VIDEO ... SIGN IN"),
            Some(AuthReason::PrivateVideo)
        );
    }

    #[test]
    fn unrelated_text_is_unclassified() {
        assert_eq!(classify_auth_failure(""), None);
        assert_eq!(
            classify_auth_failure("ERROR: unable to download video data: HTTP Error 500"),
            None
        );
        assert_eq!(classify_auth_failure("Sign in"), None);
    }

    #[test]
    fn history_reason_format() {
        assert_eq!(
            AuthReason::MembersOnly.history_reason(),
            "auth_failed_members_only"
        );
    }
}
