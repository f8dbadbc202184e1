//! URL handling module for Ripple-Crawl
//!
//! This module provides the crawl target record (`CrawlUrl`), the closed error
//! taxonomy attached to crawl outcomes, URL normalization, and origin
//! extraction for robots.txt scoping.

mod domain;
mod normalize;

use crate::{UrlError, UrlResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

pub use domain::{extract_host, Origin};
pub use normalize::{normalize_url, resolve_link};

/// Maximum number of characters kept from an error message
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Outcome error of a single crawl attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The origin's robots.txt forbids the URL, or could not be obtained
    RobotsNotAllowed,
    /// The server answered with a status the crawler does not accept
    HttpError,
    /// The request failed at the transport level
    RequestError,
    /// A content handler failed
    HandlersError,
    /// Anything else
    OtherError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RobotsNotAllowed => "ROBOTS_NOT_ALLOWED",
            Self::HttpError => "HTTP_ERROR",
            Self::RequestError => "REQUEST_ERROR",
            Self::HandlersError => "HANDLERS_ERROR",
            Self::OtherError => "OTHER_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROBOTS_NOT_ALLOWED" => Ok(Self::RobotsNotAllowed),
            "HTTP_ERROR" => Ok(Self::HttpError),
            "REQUEST_ERROR" => Ok(Self::RequestError),
            "HANDLERS_ERROR" => Ok(Self::HandlersError),
            "OTHER_ERROR" => Ok(Self::OtherError),
            other => Err(UrlError::UnknownErrorCode(other.to_string())),
        }
    }
}

/// A crawl target together with the outcome of its latest attempt
///
/// The address is normalized on construction, so two `CrawlUrl`s built from
/// equivalent strings share the same `unique_id` and collapse into one
/// frontier entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlUrl {
    address: Url,
    status_code: Option<u16>,
    error_code: Option<ErrorCode>,
    error_message: Option<String>,
}

impl CrawlUrl {
    /// Parses and normalizes a URL string into a never-attempted crawl target
    ///
    /// # Examples
    ///
    /// ```
    /// use ripple_crawl::CrawlUrl;
    ///
    /// let a = CrawlUrl::parse("https://example.com").unwrap();
    /// let b = CrawlUrl::parse("https://example.com/").unwrap();
    /// assert_eq!(a.unique_id(), b.unique_id());
    /// ```
    pub fn parse(address: &str) -> UrlResult<Self> {
        Ok(Self::from_url(normalize_url(address)?))
    }

    /// Wraps an already-normalized URL
    pub fn from_url(address: Url) -> Self {
        Self {
            address,
            status_code: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Returns a copy carrying a successful outcome
    pub fn with_status(&self, status_code: u16) -> Self {
        Self {
            address: self.address.clone(),
            status_code: Some(status_code),
            error_code: None,
            error_message: None,
        }
    }

    /// Returns a copy carrying a failed outcome
    pub fn with_error(
        &self,
        error_code: ErrorCode,
        status_code: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            address: self.address.clone(),
            status_code,
            error_code: Some(error_code),
            error_message: Some(truncate_message(message.into())),
        }
    }

    /// Rebuilds a record read back from a frontier backend
    pub(crate) fn from_parts(
        address: &str,
        status_code: Option<u16>,
        error_code: Option<ErrorCode>,
        error_message: Option<String>,
    ) -> UrlResult<Self> {
        Ok(Self {
            address: Url::parse(address).map_err(|e| UrlError::Parse(e.to_string()))?,
            status_code,
            error_code,
            error_message: error_message.map(truncate_message),
        })
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn as_str(&self) -> &str {
        self.address.as_str()
    }

    /// The frontier deduplication key
    pub fn unique_id(&self) -> &str {
        self.address.as_str()
    }

    /// Hex-encoded SHA-256 of the unique id, used as the relational key
    pub fn url_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.unique_id().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// True if the URL has never produced an outcome
    pub fn is_unattempted(&self) -> bool {
        self.status_code.is_none() && self.error_code.is_none()
    }

    /// True if the latest attempt failed
    pub fn is_failure(&self) -> bool {
        self.error_code.is_some()
    }
}

impl fmt::Display for CrawlUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address.as_str())
    }
}

fn truncate_message(message: String) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        message
    } else {
        message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    }
}
