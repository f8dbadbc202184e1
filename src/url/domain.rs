use std::fmt;
use url::Url;

/// Host key used when a URL carries no hostname
pub const FALLBACK_HOST: &str = "OTHER";

/// Extracts the lowercase host from a URL
///
/// URLs without a host share the `OTHER` key so that per-host bookkeeping
/// always has somewhere to go.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_crawl::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_host(&url), "example.com");
/// ```
pub fn extract_host(url: &Url) -> String {
    match url.host_str() {
        Some(host) if !host.is_empty() => host.to_lowercase(),
        _ => FALLBACK_HOST.to_string(),
    }
}

/// The (scheme, host, port) triple that scopes a robots.txt file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Builds the origin of a URL; the port is kept only when it is not the
    /// scheme's default
    pub fn of(url: &Url) -> Self {
        Self {
            scheme: url.scheme().to_string(),
            host: extract_host(url),
            port: url.port(),
        }
    }

    /// Returns `scheme://host[:port]/robots.txt`
    pub fn robots_url(&self) -> String {
        format!("{}/robots.txt", self)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}
