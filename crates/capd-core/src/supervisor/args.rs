//! Capture-tool argument list, user flag parsing and link validation.

use std::net::IpAddr;
use std::path::Path;
use url::{Host, Url};

/// Flags that can run arbitrary commands or redirect the tool's configuration.
const DENIED_FLAGS: &[&str] = &["--exec", "--config-location", "--batch-file"];

/// Hosts the capture tool may be pointed at.
const ALLOWED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagError {
    #[error("flag \"{0}\" is not allowed")]
    Denied(&'static str),
    #[error("unbalanced {0} quote in extra flags")]
    UnbalancedQuote(char),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("invalid link {0}: {1}")]
    Parse(String, url::ParseError),
    #[error("link must use https: {0}")]
    Scheme(String),
    #[error("link host is not an allowed video host: {0}")]
    Host(String),
}

/// Split a user flag string into arguments. Single and double quotes group
/// words; quotes themselves are dropped. Spaces and tabs separate.
pub fn tokenize_flags(input: &str) -> Result<Vec<String>, FlagError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ' ' || c == '\t' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if let Some(q) = quote {
        return Err(FlagError::UnbalancedQuote(q));
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

/// Reject denylisted flags (case-insensitive substring match on the raw
/// string) and return the tokenized arguments.
pub fn validate_extra_flags(input: &str) -> Result<Vec<String>, FlagError> {
    let lower = input.to_lowercase();
    if let Some(denied) = DENIED_FLAGS.iter().find(|f| lower.contains(*f)) {
        return Err(FlagError::Denied(*denied));
    }
    tokenize_flags(input)
}

/// Accept only `https` links on an allow-listed host (or a subdomain of one).
/// IP-literal hosts are always rejected, which also rules out loopback and
/// private ranges.
pub fn validate_link(link: &str) -> Result<Url, LinkError> {
    let url = Url::parse(link).map_err(|e| LinkError::Parse(link.to_string(), e))?;
    if url.scheme() != "https" {
        return Err(LinkError::Scheme(link.to_string()));
    }
    let host = match url.host() {
        Some(Host::Domain(d)) => d.to_ascii_lowercase(),
        Some(Host::Ipv4(ip)) => return Err(LinkError::Host(IpAddr::V4(ip).to_string())),
        Some(Host::Ipv6(ip)) => return Err(LinkError::Host(IpAddr::V6(ip).to_string())),
        None => return Err(LinkError::Host(String::new())),
    };
    let allowed = ALLOWED_HOSTS
        .iter()
        .any(|a| host == *a || host.ends_with(&format!(".{a}")));
    if !allowed {
        return Err(LinkError::Host(host));
    }
    Ok(url)
}

/// Full argument list: credentials first, user flags right before the link.
pub fn capture_args(
    dir: &Path,
    link: &str,
    credential_args: &[String],
    user_flags: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = credential_args.to_vec();
    args.extend(
        [
            "--live-from-start",
            "-ciw",
            "--no-part",
            "--no-progress",
            "--no-cache-dir",
            "--socket-timeout",
            "30",
            "--retries",
            "20",
            "--fragment-retries",
            "50",
            "--skip-unavailable-fragments",
            "--no-abort-on-error",
            "-o",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(dir.join("%(title)s.%(ext)s").display().to_string());
    args.extend(
        [
            "--write-thumbnail",
            "--convert-thumbnails",
            "png",
            "--embed-thumbnail",
            "--add-metadata",
            "-f",
            "bestvideo+bestaudio/best",
            "--merge-output-format",
            "mp4",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.extend(user_flags.iter().cloned());
    args.push(link.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_handles_quotes() {
        assert_eq!(
            tokenize_flags(r#"--embed-subs  --sub-langs "en,ja"	-o 'a b'"#).unwrap(),
            vec!["--embed-subs", "--sub-langs", "en,ja", "-o", "a b"]
        );
        assert!(tokenize_flags("   ").unwrap().is_empty());
        assert_eq!(
            tokenize_flags(r#"--x "it's""#).unwrap(),
            vec!["--x", "it's"]
        );
    }

    #[test]
    fn tokenize_rejects_unbalanced_quote() {
        assert_eq!(
            tokenize_flags("--title 'oops"),
            Err(FlagError::UnbalancedQuote('\''))
        );
    }

    #[test]
    fn denylist_is_case_insensitive() {
        assert_eq!(
            validate_extra_flags("--EXEC 'rm -rf /'"),
            Err(FlagError::Denied("--exec"))
        );
        assert_eq!(
            validate_extra_flags("--config-location=/tmp/x"),
            Err(FlagError::Denied("--config-location"))
        );
        assert_eq!(
            validate_extra_flags("--batch-file list.txt"),
            Err(FlagError::Denied("--batch-file"))
        );
        assert!(FlagError::Denied("--exec").to_string().contains("--exec"));
        assert!(validate_extra_flags("--embed-subs").is_ok());
    }

    #[test]
    fn links_must_be_https_on_allowed_host() {
        assert!(validate_link("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_link("https://youtu.be/abc").is_ok());
        assert!(matches!(
            validate_link("http://www.youtube.com/watch?v=abc"),
            Err(LinkError::Scheme(_))
        ));
        assert!(matches!(
            validate_link("https://evil-youtube.com/x"),
            Err(LinkError::Host(_))
        ));
        assert!(matches!(
            validate_link("https://127.0.0.1/watch"),
            Err(LinkError::Host(_))
        ));
        assert!(matches!(
            validate_link("https://[::1]/watch"),
            Err(LinkError::Host(_))
        ));
        assert!(matches!(validate_link("not a url"), Err(LinkError::Parse(..))));
    }

    #[test]
    fn args_order() {
        let creds = vec!["--cookies".to_string(), "/c.txt".to_string()];
        let user = vec!["--embed-subs".to_string()];
        let args = capture_args(Path::new("/dl/x"), "https://youtu.be/v", &creds, &user);
        assert_eq!(&args[..3], &["--cookies", "/c.txt", "--live-from-start"]);
        assert_eq!(args[args.len() - 2], "--embed-subs");
        assert_eq!(args.last().unwrap(), "https://youtu.be/v");
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "/dl/x/%(title)s.%(ext)s");
    }
}
