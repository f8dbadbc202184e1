//! HTTP transport
//!
//! The crawler talks to the network only through the [`Transport`] trait, so
//! tests and embedders can substitute their own. [`ReqwestTransport`] is the
//! default implementation.

use crate::config::{TransportConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{redirect::Policy, Client};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirect hops followed when a request asks for it
const MAX_REDIRECTS: usize = 10;

/// Transport-level failures (no HTTP response was obtained)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// A single GET request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub follow_redirects: bool,
}

/// A complete HTTP response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Returns a header value if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends HTTP requests on behalf of the crawler
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// The User-Agent sent with every request
#[derive(Clone)]
pub enum UserAgent {
    Static(String),
    /// Computed from the URL being fetched
    PerUrl(Arc<dyn Fn(&Url) -> String + Send + Sync>),
}

impl UserAgent {
    /// Builds `Name/Version (+ContactURL; ContactEmail)`
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_crawl::config::UserAgentConfig;
    /// use ripple_crawl::crawler::UserAgent;
    ///
    /// let config = UserAgentConfig {
    ///     crawler_name: "RippleCrawl".to_string(),
    ///     crawler_version: "1.0".to_string(),
    ///     contact_url: "https://example.com/about".to_string(),
    ///     contact_email: "admin@example.com".to_string(),
    /// };
    ///
    /// let ua = UserAgent::from_config(&config);
    /// let url = url::Url::parse("https://example.com/").unwrap();
    /// assert_eq!(
    ///     ua.for_url(&url),
    ///     "RippleCrawl/1.0 (+https://example.com/about; admin@example.com)"
    /// );
    /// ```
    pub fn from_config(config: &UserAgentConfig) -> Self {
        UserAgent::Static(format!(
            "{}/{} (+{}; {})",
            config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
        ))
    }

    pub fn per_url<F>(f: F) -> Self
    where
        F: Fn(&Url) -> String + Send + Sync + 'static,
    {
        UserAgent::PerUrl(Arc::new(f))
    }

    pub fn for_url(&self, url: &Url) -> String {
        match self {
            UserAgent::Static(ua) => ua.clone(),
            UserAgent::PerUrl(f) => f(url),
        }
    }

    /// The product token matched against `User-agent:` lines in robots.txt
    pub fn robots_token(&self, url: &Url) -> String {
        let full = self.for_url(url);
        full.split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        UserAgent::Static(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
    }
}

impl fmt::Debug for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgent::Static(ua) => f.debug_tuple("Static").field(ua).finish(),
            UserAgent::PerUrl(_) => f.write_str("PerUrl(..)"),
        }
    }
}

/// Client settings for [`ReqwestTransport`]
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TransportConfig> for TransportOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

/// [`Transport`] backed by reqwest
///
/// Keeps two clients because reqwest fixes the redirect policy per client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    direct: Client,
    following: Client,
}

impl ReqwestTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, reqwest::Error> {
        Ok(Self {
            direct: build_http_client(options, Policy::none())?,
            following: build_http_client(options, Policy::limited(MAX_REDIRECTS))?,
        })
    }
}

fn build_http_client(options: &TransportOptions, redirect: Policy) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(options.timeout)
        .connect_timeout(options.connect_timeout)
        .redirect(redirect)
        .gzip(true)
        .brotli(true)
        .build()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let response = client
            .get(request.url.as_str())
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
