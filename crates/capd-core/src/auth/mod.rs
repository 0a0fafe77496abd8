//! Authentication-required detection and the credential signal.
//!
//! The capture tool reports members-only, private and age-gated videos with a
//! handful of phrasings; [`classify_auth_failure`] maps them to an
//! [`AuthReason`]. When no credential is usable those videos are suppressed
//! for a while through the in-memory [`AuthSkipCache`].

mod classify;
mod credentials;
mod skip_cache;

pub use classify::{classify_auth_failure, AuthReason};
pub use credentials::{CookieFile, CredentialProbe, NoCredentials};
pub use skip_cache::AuthSkipCache;
