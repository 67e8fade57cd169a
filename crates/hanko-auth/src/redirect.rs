//! Redirect targets: allow-listing, response shape and error URLs.

use regex::Regex;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;

/// How a redirect target is reached.
///
/// Resolved once from the target and threaded through the flow so every exit
/// point answers the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectKind {
    /// An `http`/`https` target: answered with `307 Temporary Redirect`.
    Browser,
    /// Any other scheme (mobile deep link): answered with `204 No Content`
    /// and a `Location` header, since the user agent cannot follow it.
    NativeDeepLink,
}

impl RedirectKind {
    /// Resolves the kind for a redirect target.
    #[must_use]
    pub fn for_target(target: &str) -> Self {
        let lower = target.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Browser
        } else {
            Self::NativeDeepLink
        }
    }

    #[must_use]
    pub fn is_browser(&self) -> bool {
        matches!(self, Self::Browser)
    }
}

/// Allow-list of redirect targets, configured as glob patterns.
///
/// - `*` matches any characters except `/` and `.`
/// - `**` matches anything
/// - a trailing `/**` also matches the bare prefix
///
/// Targets are compared without a trailing `/`.
#[derive(Debug, Clone)]
pub struct RedirectAllowList {
    patterns: Vec<Regex>,
}

impl RedirectAllowList {
    /// Compiles the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern does not compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> AuthResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&glob_to_regex(p.as_ref())).map_err(|e| {
                    AuthError::configuration(format!(
                        "invalid allowed redirect pattern '{}': {e}",
                        p.as_ref()
                    ))
                })
            })
            .collect::<AuthResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Returns `true` if `target` may be used as a redirect target.
    ///
    /// Relative, malformed, and credential-carrying URLs are always rejected.
    #[must_use]
    pub fn is_allowed(&self, target: &str) -> bool {
        if target.is_empty() || target.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return false;
        }
        let Ok(url) = Url::parse(target) else {
            return false;
        };
        if !url.username().is_empty() || url.password().is_some() {
            return false;
        }
        if matches!(url.scheme(), "http" | "https") && url.host_str().is_none() {
            return false;
        }

        let normalized = target.trim_end_matches('/');
        self.patterns.iter().any(|p| p.is_match(normalized))
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let (pattern, any_suffix) = match pattern.strip_suffix("/**") {
        Some(prefix) => (prefix, true),
        None => (pattern.trim_end_matches('/'), false),
    };
    let body = pattern
        .split("**")
        .map(|part| {
            part.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/.]*")
        })
        .collect::<Vec<_>>()
        .join(".*");
    if any_suffix {
        format!("^{body}(/.*)?$")
    } else {
        format!("^{body}$")
    }
}

/// Appends a query parameter to a redirect target.
///
/// # Errors
///
/// Returns an internal error if `target` does not parse.
pub fn append_query(target: &str, key: &str, value: &str) -> AuthResult<Url> {
    let mut url = Url::parse(target)
        .map_err(|e| AuthError::internal(format!("could not parse redirect url: {e}")))?;
    url.query_pairs_mut().append_pair(key, value);
    Ok(url)
}

/// Builds the error redirect URL for `err`.
///
/// `error` carries the coarse code and `error_description` the public
/// description. When `base` does not parse, `fallback` is used instead.
#[must_use]
pub fn error_redirect_url(base: &str, fallback: &str, err: &AuthError) -> String {
    let Ok(mut url) = Url::parse(base).or_else(|_| Url::parse(fallback)) else {
        return fallback.to_string();
    };
    url.query_pairs_mut()
        .append_pair("error", err.redirect_error_code())
        .append_pair("error_description", &err.public_description());
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> RedirectAllowList {
        RedirectAllowList::new(&[
            "https://app.example/**",
            "https://*.example.org/callback",
            "myapp://login",
        ])
        .unwrap()
    }

    #[test]
    fn test_redirect_kind() {
        assert_eq!(
            RedirectKind::for_target("https://app.example/cb"),
            RedirectKind::Browser
        );
        assert_eq!(
            RedirectKind::for_target("HTTP://app.example"),
            RedirectKind::Browser
        );
        assert_eq!(
            RedirectKind::for_target("myapp://login"),
            RedirectKind::NativeDeepLink
        );
        assert!(!RedirectKind::for_target("httpx://login").is_browser());
    }

    #[test]
    fn test_allowed_targets() {
        let list = allow_list();
        assert!(list.is_allowed("https://app.example"));
        assert!(list.is_allowed("https://app.example/"));
        assert!(list.is_allowed("https://app.example/cb"));
        assert!(list.is_allowed("https://app.example/deep/path?x=1"));
        assert!(list.is_allowed("https://eu.example.org/callback"));
        assert!(list.is_allowed("myapp://login"));
    }

    #[test]
    fn test_rejected_targets() {
        let list = allow_list();
        for target in [
            "",
            "/relative/path",
            "cb",
            "ftp://evil",
            "https://evil.example",
            "https://app.example.evil.com/cb",
            "https://app.example@evil.com/cb",
            "https://user:pw@app.example/cb",
            "https://a.b.example.org/callback",
            "https://eu.example.org/callback/more",
            "myapp://login/other",
            "https://app.example/cb\n",
            "javascript:alert(1)",
        ] {
            assert!(!list.is_allowed(target), "{target} should be rejected");
        }
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let keys: [&str; 0] = [];
        let list = RedirectAllowList::new(&keys).unwrap();
        assert!(!list.is_allowed("https://app.example/cb"));
    }

    #[test]
    fn test_pattern_metacharacters_are_literal() {
        let list = RedirectAllowList::new(&["https://app.example/a+b"]).unwrap();
        assert!(list.is_allowed("https://app.example/a+b"));
        assert!(!list.is_allowed("https://app.example/aab"));
    }

    #[test]
    fn test_append_query() {
        let url = append_query("https://app.example/cb?x=1", "hanko_token", "abc").unwrap();
        assert_eq!(url.as_str(), "https://app.example/cb?x=1&hanko_token=abc");

        let url = append_query("myapp://login", "hanko_token", "abc").unwrap();
        assert_eq!(url.as_str(), "myapp://login?hanko_token=abc");

        assert!(append_query("not a url", "k", "v").is_err());
    }

    #[test]
    fn test_error_redirect_url() {
        let err = AuthError::invalid_request("redirect to 'ftp://evil' not allowed");
        let url = error_redirect_url("https://app.example/login", "https://fallback/error", &err);
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(parsed.host_str(), Some("app.example"));
        assert_eq!(
            pairs,
            vec![
                ("error".to_string(), "invalid_request".to_string()),
                (
                    "error_description".to_string(),
                    "redirect to 'ftp://evil' not allowed".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_error_redirect_url_falls_back() {
        let err = AuthError::storage("pool timed out");
        let url = error_redirect_url("", "https://fallback.example/error", &err);
        assert!(url.starts_with("https://fallback.example/error?error=server_error"));
        assert!(!url.contains("pool"));
    }
}
