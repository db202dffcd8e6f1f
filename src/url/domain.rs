use crate::UrlError;
use url::{Host, Url};

/// Second-level suffixes under which registrations happen one label deeper
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "ac.uk", "co.uk", "gov.uk", "org.uk", "me.uk", "ltd.uk", "plc.uk", "com.au", "net.au",
    "org.au", "edu.au", "gov.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "ac.jp",
    "co.kr", "or.kr", "com.br", "net.br", "org.br", "com.cn", "net.cn", "org.cn", "com.mx",
    "com.tr", "com.tw", "com.hk", "com.sg", "co.in", "net.in", "org.in", "co.za", "co.il",
    "com.ar", "com.co", "com.pl", "com.ua",
];

/// Extracts the lowercase host from a URL
///
/// ```
/// use url::Url;
/// use meander::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.COM:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Resolves the registrable domain (the Site key) of a URL
///
/// IP addresses and single-label hosts such as `localhost` are their own
/// site. For domain names the registrable domain is the last two labels, or
/// the last three when the last two form a known multi-label public suffix.
///
/// ```
/// use url::Url;
/// use meander::url::registrable_domain;
///
/// let url = Url::parse("https://news.bbc.co.uk/a").unwrap();
/// assert_eq!(registrable_domain(&url).unwrap(), "bbc.co.uk");
/// ```
pub fn registrable_domain(url: &Url) -> Result<String, UrlError> {
    match url.host() {
        None => Err(UrlError::MissingHost),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        Some(Host::Domain(domain)) => registrable_from_host(domain),
    }
}

fn registrable_from_host(host: &str) -> Result<String, UrlError> {
    let host = host.trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();

    if labels.iter().any(|label| label.is_empty()) {
        return Err(UrlError::NoRegistrableDomain(host));
    }

    let keep = match labels.len() {
        1 if host == "localhost" => 1,
        1 => return Err(UrlError::NoRegistrableDomain(host)),
        2 => 2,
        n => {
            let suffix = labels[n - 2..].join(".");
            if MULTI_LABEL_SUFFIXES.contains(&suffix.as_str()) {
                3
            } else {
                2
            }
        }
    };

    if keep > labels.len() {
        // The host is itself a public suffix such as "co.uk"
        return Err(UrlError::NoRegistrableDomain(host));
    }

    Ok(labels[labels.len() - keep..].join("."))
}

/// Checks a lowercase host against a domain pattern
///
/// `example.com` matches only that host; `*.example.com` matches the bare
/// domain and every subdomain below it.
///
/// ```
/// use meander::url::matches_domain_pattern;
///
/// assert!(matches_domain_pattern("*.example.com", "example.com"));
/// assert!(matches_domain_pattern("*.example.com", "api.v2.example.com"));
/// assert!(!matches_domain_pattern("*.example.com", "notexample.com"));
/// assert!(!matches_domain_pattern("example.com", "www.example.com"));
/// ```
pub fn matches_domain_pattern(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => host == pattern,
    }
}

/// True when both URLs share scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
