use crate::UrlError;
use url::Url;

/// Normalizes a URL string for storage in the frontier
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` schemes
/// 3. Require a host
/// 4. Remove the fragment
/// 5. Remove a trailing slash from the path (the root path `/` is kept)
///
/// Host lowercasing and dot-segment removal come from the URL parser itself.
/// Query strings are kept verbatim: two URLs differing only in their query
/// are different crawl targets.
///
/// # Examples
///
/// ```
/// use meander::url::normalize_url;
///
/// let url = normalize_url("http://EXAMPLE.com/a/b/#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        let trimmed = trimmed.to_string();
        url.set_path(&trimmed);
    }

    Ok(url)
}

/// Returns both trailing-slash variants of a URL string
///
/// Only the path is toggled: in the first element it never ends in `/`, in
/// the second it always does. Any query or fragment is kept as written. The
/// seen-set stores both so either spelling of the same target is recognised.
///
/// ```
/// use meander::url::slash_variants;
///
/// let (bare, slashed) = slash_variants("http://example.com/a/");
/// assert_eq!(bare, "http://example.com/a");
/// assert_eq!(slashed, "http://example.com/a/");
///
/// let (bare, slashed) = slash_variants("http://example.com/go?next=/");
/// assert_eq!(bare, "http://example.com/go?next=/");
/// assert_eq!(slashed, "http://example.com/go/?next=/");
/// ```
pub fn slash_variants(url: &str) -> (String, String) {
    let split = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    let (head, tail) = url.split_at(split);
    let head = head.trim_end_matches('/');
    (format!("{}{}", head, tail), format!("{}/{}", head, tail))
}
