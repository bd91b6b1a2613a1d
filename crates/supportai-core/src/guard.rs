//! Domain guard: binds a widget request's origin to an app's allowlist.
//!
//! Every widget-facing request (config fetch, chat, new conversation, ingest,
//! search) passes through [`authorize`] before any conversation or
//! knowledge-base access. The check is a pure function of the app record
//! and the claimed parent origin.
//!
//! Allowed domains are stored normalized: lower-case, without scheme, path,
//! or port. [`parse_domains`] performs that normalization on raw owner input.

use thiserror::Error;
use url::Url;

use crate::models::App;

/// Reasons a widget request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("no app registered for key '{0}'")]
    InvalidAppKey(String),
    #[error("parent origin is missing or not a valid URL")]
    MissingParentOrigin,
    #[error("host '{host}' is not in the allowed domains [{}]", allowed.join(", "))]
    DomainNotAllowed { host: String, allowed: Vec<String> },
}

impl GuardError {
    /// Machine-readable error code surfaced to the widget.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::InvalidAppKey(_) => "INVALID_APP_KEY",
            GuardError::MissingParentOrigin => "MISSING_PARENT_ORIGIN",
            GuardError::DomainNotAllowed { .. } => "DOMAIN_NOT_ALLOWED",
        }
    }
}

/// Decide whether a request claiming `parent_origin` may use `app`.
///
/// `app` is the result of looking up `app_key`; `None` means the key is
/// unknown. On success the app is returned for the caller's convenience.
pub fn authorize<'a>(
    app_key: &str,
    app: Option<&'a App>,
    parent_origin: &str,
) -> Result<&'a App, GuardError> {
    let app = app.ok_or_else(|| GuardError::InvalidAppKey(app_key.to_string()))?;

    let host = origin_host(parent_origin).ok_or(GuardError::MissingParentOrigin)?;

    let allowed = app
        .allowed_domains
        .iter()
        .filter_map(|d| normalize_domain(d))
        .any(|d| d == host);

    if !allowed {
        return Err(GuardError::DomainNotAllowed {
            host,
            allowed: app.allowed_domains.clone(),
        });
    }

    Ok(app)
}

/// Extract the lower-cased hostname from an origin or page URL.
///
/// Returns `None` for empty input, relative URLs, or URLs without a host.
pub fn origin_host(origin: &str) -> Option<String> {
    let origin = origin.trim();
    if origin.is_empty() {
        return None;
    }
    let url = Url::parse(origin).ok()?;
    let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// The `scheme://host[:port]` origin of a page URL, e.g. from a `Referer` header.
pub fn origin_of(page_url: &str) -> Option<String> {
    let origin = Url::parse(page_url.trim()).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Normalize one allowlist entry: strip scheme, path, and port; lower-case.
///
/// `https://Foo.COM/x` becomes `foo.com`. Returns `None` when nothing is left.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut d = raw.trim();
    if let Some(idx) = d.find("://") {
        d = &d[idx + 3..];
    }
    if let Some(idx) = d.find(['/', '?', '#']) {
        d = &d[..idx];
    }
    if let Some(idx) = d.rfind('@') {
        d = &d[idx + 1..];
    }
    let d = strip_port(d).trim_matches(|c| c == '[' || c == ']');
    if d.is_empty() {
        return None;
    }
    Some(d.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // bracketed IPv6, optionally followed by :port
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if !h.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

/// Normalize raw allowlist input into a de-duplicated domain list.
///
/// Each input may itself hold several entries separated by commas, spaces,
/// or newlines. Order of first appearance is preserved.
pub fn parse_domains<S: AsRef<str>>(inputs: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for input in inputs {
        for part in input.as_ref().split([',', ' ', '\n', '\r', '\t']) {
            if let Some(d) = normalize_domain(part) {
                if !out.contains(&d) {
                    out.push(d);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CopyText, Theme, DEFAULT_BORDER_COLOR};

    fn app_with(domains: &[&str]) -> App {
        App {
            app_key: "app_test".into(),
            owner_id: "owner".into(),
            name: "Test".into(),
            allowed_domains: domains.iter().map(|s| s.to_string()).collect(),
            theme: Theme::default(),
            copy: CopyText::default(),
            enable_border: false,
            border_color: DEFAULT_BORDER_COLOR.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://Foo.COM/x").as_deref(), Some("foo.com"));
        assert_eq!(normalize_domain("http://localhost:3000").as_deref(), Some("localhost"));
        assert_eq!(normalize_domain("  Example.org  ").as_deref(), Some("example.org"));
        assert_eq!(normalize_domain("docs.site.io/path?q=1").as_deref(), Some("docs.site.io"));
        assert_eq!(normalize_domain("https://"), None);
        assert_eq!(normalize_domain(""), None);
    }

    #[test]
    fn test_parse_domains_splits_and_dedups() {
        let raw = vec![
            "https://Foo.com/a, bar.io\nFOO.com".to_string(),
            "baz.dev  qux.net".to_string(),
        ];
        assert_eq!(
            parse_domains(&raw),
            vec!["foo.com", "bar.io", "baz.dev", "qux.net"]
        );
    }

    #[test]
    fn test_parsed_domains_are_clean() {
        let raw = ["HTTPS://A.B.C/d/e", "http://X.y:8080/", "plain.COM"];
        for d in parse_domains(&raw) {
            assert_eq!(d, d.to_lowercase());
            assert!(!d.contains("://"));
            assert!(!d.contains('/'));
        }
    }

    #[test]
    fn test_origin_host() {
        assert_eq!(origin_host("https://Example.com").as_deref(), Some("example.com"));
        assert_eq!(origin_host("http://localhost:3000/page").as_deref(), Some("localhost"));
        assert_eq!(origin_host(""), None);
        assert_eq!(origin_host("example.com"), None);
        assert_eq!(origin_host("not a url"), None);
    }

    #[test]
    fn test_origin_of_referer() {
        assert_eq!(
            origin_of("https://shop.example.com/cart?id=1").as_deref(),
            Some("https://shop.example.com")
        );
        assert_eq!(origin_of("garbage"), None);
    }

    #[test]
    fn test_authorize_allows_listed_host() {
        let app = app_with(&["example.com"]);
        let ok = authorize("app_test", Some(&app), "https://example.com").unwrap();
        assert_eq!(ok.app_key, "app_test");
    }

    #[test]
    fn test_authorize_unknown_app() {
        let err = authorize("nope", None, "https://example.com").unwrap_err();
        assert_eq!(err.code(), "INVALID_APP_KEY");
    }

    #[test]
    fn test_authorize_missing_origin() {
        let app = app_with(&["example.com"]);
        assert_eq!(
            authorize("app_test", Some(&app), "").unwrap_err(),
            GuardError::MissingParentOrigin
        );
        assert_eq!(
            authorize("app_test", Some(&app), "::::").unwrap_err().code(),
            "MISSING_PARENT_ORIGIN"
        );
    }

    #[test]
    fn test_authorize_rejects_other_host() {
        let app = app_with(&["example.com"]);
        let err = authorize("app_test", Some(&app), "https://evil.com").unwrap_err();
        match err {
            GuardError::DomainNotAllowed { host, allowed } => {
                assert_eq!(host, "evil.com");
                assert_eq!(allowed, vec!["example.com"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_authorize_no_subdomain_wildcard() {
        let app = app_with(&["example.com"]);
        assert!(authorize("app_test", Some(&app), "https://sub.example.com").is_err());
    }

    #[test]
    fn test_authorize_case_insensitive() {
        let app = app_with(&["Example.COM"]);
        assert!(authorize("app_test", Some(&app), "https://EXAMPLE.com").is_ok());
    }
}
