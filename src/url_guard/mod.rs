//! URL Guard (spec §4.1): syntactic validation, normalization, and the SSRF
//! blocklist that keeps the crawler off internal/private network targets.
//!
//! The `ParsedUrl` wrapper follows the teacher's `imurl::ImUrl` shape (an
//! `Arc<Url>` plus a cached normalized string for cheap `Clone`/`Hash`), but
//! adds the private-address checks `ImUrl` never needed.

use std::net::IpAddr;
use std::sync::Arc;

use url::Url;

use crate::errors::WorkerError;

mod blocklist;
pub use blocklist::is_blocked_address;

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
];

const SKIPPED_SCHEMES: &[&str] = &["mailto", "tel", "javascript", "data", "ftp", "vbscript"];

/// File extensions the crawler never follows, grouped as spec §4.1
/// describes: documents, archives, media, images, scripts/styles, binaries.
const SKIPPED_EXTENSIONS: &[&str] = &[
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
    // archives
    "zip", "tar", "gz", "bz2", "7z", "rar", "xz",
    // media
    "mp3", "mp4", "avi", "mov", "wmv", "flv", "webm", "ogg", "wav", "m4a",
    // images
    "png", "jpg", "jpeg", "gif", "svg", "webp", "bmp", "ico", "tiff",
    // scripts/styles
    "js", "mjs", "css", "map",
    // binaries
    "exe", "dmg", "pkg", "deb", "rpm", "bin", "iso", "apk",
];

/// A validated, normalized URL. Cheap to clone (an `Arc<Url>` inside).
#[derive(Debug, Clone)]
pub struct ParsedUrl {
    normalized: Arc<str>,
    url: Arc<Url>,
}

impl ParsedUrl {
    /// The normalized URL string: lowercased host, default port stripped,
    /// trailing-slash-normalized, sorted query, fragment dropped.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// `host` minus a leading `www.`.
    pub fn domain(&self) -> &str {
        self.host().strip_prefix("www.").unwrap_or_else(|| self.host())
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl PartialEq for ParsedUrl {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}
impl Eq for ParsedUrl {}

impl std::hash::Hash for ParsedUrl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

/// Normalize a parsed URL into spec §4.1's canonical string form: lowercased
/// host, default port stripped, trailing slash dropped (unless root),
/// query params sorted, fragment dropped.
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    let _ = normalized.set_fragment(None);

    if let Some(host) = url.host_str() {
        let _ = normalized.set_host(Some(&host.to_lowercase()));
    }

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = normalized.set_port(None);
    }

    if let Some(query) = url.query() {
        let mut pairs: Vec<&str> = query.split('&').collect();
        pairs.sort_unstable();
        normalized.set_query(Some(&pairs.join("&")));
    }

    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}

/// `validateSyntactic(input)`: trims whitespace, defaults to `https://` when
/// no scheme is present, rejects non-http(s) schemes, empty hosts, localhost
/// variants, the blocked hostname list, and literal private IPv4 in the
/// hostname position.
pub fn validate_syntactic(input: &str) -> Result<ParsedUrl, WorkerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WorkerError::Input("empty URL".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| WorkerError::Input(format!("invalid syntax: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(WorkerError::Input(format!(
            "disallowed scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| WorkerError::Input("empty host".into()))?;
    if host.is_empty() {
        return Err(WorkerError::Input("empty host".into()));
    }

    let host_lower = host.to_lowercase();
    if BLOCKED_HOSTNAMES.contains(&host_lower.as_str()) {
        return Err(WorkerError::Input(format!("blocked host: {host}")));
    }

    if let Ok(ip) = host.parse::<IpAddr>()
        && is_blocked_address(&ip)
    {
        return Err(WorkerError::Input(format!("private address: {ip}")));
    }

    let normalized = normalize_url(&url);
    Ok(ParsedUrl {
        normalized: Arc::from(normalized.as_str()),
        url: Arc::new(url),
    })
}

/// `validateWithDNS(input)`: syntactic validation, then resolves the host
/// and rejects if any resolved address falls in a blocked range.
pub async fn validate_with_dns(input: &str) -> Result<ParsedUrl, WorkerError> {
    let parsed = validate_syntactic(input)?;

    let host = parsed.host();
    // Literal IP hosts were already checked syntactically; only resolve
    // names.
    if host.parse::<IpAddr>().is_ok() {
        return Ok(parsed);
    }

    let port = parsed.port().unwrap_or(443);
    let lookup_target = format!("{host}:{port}");
    let addrs = tokio::net::lookup_host(&lookup_target)
        .await
        .map_err(|e| WorkerError::Network(format!("DNS resolution failed for {host}: {e}")))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_blocked_address(&addr.ip()) {
            return Err(WorkerError::Input(format!(
                "host {host} resolves to blocked address {}",
                addr.ip()
            )));
        }
    }

    if !resolved_any {
        return Err(WorkerError::Network(format!("no addresses for host {host}")));
    }

    Ok(parsed)
}

/// `shouldSkipURL(u)`: true for non-HTML schemes and file extensions in the
/// closed skip set.
pub fn should_skip_url(url: &Url) -> bool {
    if SKIPPED_SCHEMES.contains(&url.scheme()) {
        return true;
    }

    let path = url.path();
    if let Some(ext) = path.rsplit('.').next()
        && path.contains('.')
        && SKIPPED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    {
        return true;
    }

    false
}

/// `sameDomain(u1, u2)`: equal `domain` (www-insensitive, case-insensitive).
pub fn same_domain(a: &ParsedUrl, b: &ParsedUrl) -> bool {
    a.domain().eq_ignore_ascii_case(b.domain())
}

/// `resolveRelative(base, href)`: returns a normalized absolute URL, or
/// `None` if the target should be skipped or its scheme is disallowed. When
/// `same_domain_only` is set, links off the base's domain are also dropped.
pub fn resolve_relative(
    base: &ParsedUrl,
    href: &str,
    same_domain_only: bool,
) -> Option<ParsedUrl> {
    let joined = base.as_url().join(href).ok()?;
    if should_skip_url(&joined) {
        return None;
    }
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }

    let candidate = validate_syntactic(joined.as_str()).ok()?;
    if same_domain_only && !same_domain(base, &candidate) {
        return None;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_https_when_scheme_missing() {
        let parsed = validate_syntactic("example.com/path").unwrap();
        assert_eq!(parsed.as_url().scheme(), "https");
    }

    #[test]
    fn normalize_is_idempotent() {
        let first = validate_syntactic("HTTPS://Example.com:443/foo/?b=2&a=1#frag").unwrap();
        let second = validate_syntactic(first.normalized()).unwrap();
        assert_eq!(first.normalized(), second.normalized());
    }

    #[test]
    fn rejects_disallowed_scheme() {
        assert!(validate_syntactic("ftp://example.com/file").is_err());
    }

    #[test]
    fn rejects_localhost() {
        assert!(validate_syntactic("http://localhost:3000").is_err());
    }

    #[test]
    fn rejects_private_ipv4() {
        assert!(validate_syntactic("http://169.254.169.254").is_err());
        assert!(validate_syntactic("http://10.0.0.5/secret").is_err());
    }

    #[test]
    fn domain_strips_leading_www() {
        let a = validate_syntactic("https://www.example.com").unwrap();
        let b = validate_syntactic("https://example.com").unwrap();
        assert!(same_domain(&a, &b));
    }

    #[test]
    fn should_skip_non_html_extensions() {
        let u = Url::parse("https://example.com/report.pdf").unwrap();
        assert!(should_skip_url(&u));
        let u = Url::parse("https://example.com/index.html").unwrap();
        assert!(!should_skip_url(&u));
    }

    #[test]
    fn resolve_relative_filters_cross_domain() {
        let base = validate_syntactic("https://example.com/a/b").unwrap();
        let same = resolve_relative(&base, "/c", true);
        assert!(same.is_some());
        let other = resolve_relative(&base, "https://other.com/x", true);
        assert!(other.is_none());
    }
}
