//! Robots.txt handling module
//!
//! [`RobotsGate`] decides whether a URL may be fetched. Rules are fetched once
//! per origin and cached for a configurable time. The robots.txt URL is also
//! queued in the frontier, so the file gets crawled like any page and its
//! `Sitemap:` lines can be picked up by a content handler.

mod cache;
mod parser;

pub use cache::CachedRobots;
pub use parser::ParsedRobots;

use crate::crawler::{FetchRequest, Transport, TransportError, UserAgent};
use crate::frontier::Frontier;
use crate::url::{CrawlUrl, Origin};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One hour
pub const DEFAULT_ROBOTS_CACHE_TIME: Duration = Duration::from_secs(60 * 60);

/// Outcome of a robots check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsDecision {
    Allowed,
    Denied,
}

/// The rules for an origin could not be obtained; the whole origin is denied
#[derive(Debug, Error)]
pub enum RobotsError {
    #[error("robots.txt at {robots_url} returned HTTP {status}")]
    Status { robots_url: String, status: u16 },

    #[error("robots.txt at {robots_url} could not be fetched: {source}")]
    Transport {
        robots_url: String,
        #[source]
        source: TransportError,
    },

    #[error("robots.txt URL {0} is invalid")]
    InvalidUrl(String),
}

/// Fetches, caches and evaluates robots.txt per origin
pub struct RobotsGate {
    transport: Arc<dyn Transport>,
    frontier: Arc<dyn Frontier>,
    user_agent: UserAgent,
    headers: HeaderMap,
    cache: Mutex<HashMap<Origin, CachedRobots>>,
    /// One fetch per origin at a time; waiters reuse its result
    fetching: Mutex<HashMap<Origin, Arc<tokio::sync::Mutex<()>>>>,
    cache_time: chrono::Duration,
    ignore_server_error: bool,
}

impl RobotsGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        frontier: Arc<dyn Frontier>,
        user_agent: UserAgent,
    ) -> Self {
        Self {
            transport,
            frontier,
            user_agent,
            headers: HeaderMap::new(),
            cache: Mutex::new(HashMap::new()),
            fetching: Mutex::new(HashMap::new()),
            cache_time: to_chrono(DEFAULT_ROBOTS_CACHE_TIME),
            ignore_server_error: false,
        }
    }

    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = to_chrono(cache_time);
        self
    }

    /// Treat HTTP 500 on robots.txt as "no restrictions"
    pub fn with_ignore_server_error(mut self, ignore: bool) -> Self {
        self.ignore_server_error = ignore;
        self
    }

    /// Extra headers sent with robots.txt requests
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Decides whether `url` may be fetched
    pub async fn check_allowed(&self, url: &CrawlUrl) -> Result<RobotsDecision, RobotsError> {
        let origin = Origin::of(url.address());
        let robots = match self.cached(&origin) {
            Some(robots) => robots,
            None => self.fetch_once(&origin).await?,
        };

        let agent = self.user_agent.robots_token(url.address());
        if robots.is_allowed(url.as_str(), &agent) {
            Ok(RobotsDecision::Allowed)
        } else {
            Ok(RobotsDecision::Denied)
        }
    }

    /// Returns the cached rules for an origin unless they have expired
    pub fn cached(&self, origin: &Origin) -> Option<ParsedRobots> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(origin)
            .filter(|entry| !entry.is_stale(self.cache_time))
            .map(|entry| entry.content.clone())
    }

    /// Fetches and caches the rules of `origin` unless a concurrent check
    /// already did while this one waited
    async fn fetch_once(&self, origin: &Origin) -> Result<ParsedRobots, RobotsError> {
        let lock = self
            .fetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(origin.clone())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            match self.cached(origin) {
                Some(robots) => Ok(robots),
                None => self.fetch(origin).await.map(|robots| {
                    self.cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(origin.clone(), CachedRobots::new(robots.clone()));
                    robots
                }),
            }
        };

        // Clones are only taken under the map lock, so a count of two means
        // nobody else is waiting on this origin
        let mut fetching = self.fetching.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            fetching.remove(origin);
        }
        result
    }

    async fn fetch(&self, origin: &Origin) -> Result<ParsedRobots, RobotsError> {
        let robots_url = origin.robots_url();
        let robots = CrawlUrl::parse(&robots_url)
            .map_err(|_| RobotsError::InvalidUrl(robots_url.clone()))?;

        if let Err(e) = self.frontier.insert_if_not_exists(&robots).await {
            warn!("Failed to queue {}: {}", robots_url, e);
        }

        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent.for_url(robots.address())) {
            headers.insert(USER_AGENT, value);
        }

        let response = self
            .transport
            .send(FetchRequest {
                url: robots.address().clone(),
                headers,
                follow_redirects: true,
            })
            .await
            .map_err(|source| RobotsError::Transport {
                robots_url: robots_url.clone(),
                source,
            })?;

        match response.status {
            200..=299 => {
                debug!("Fetched {} ({} bytes)", robots_url, response.body.len());
                Ok(ParsedRobots::from_content(&String::from_utf8_lossy(
                    &response.body,
                )))
            }
            404 | 410 => {
                debug!("No robots.txt at {}, allowing all", robots_url);
                Ok(ParsedRobots::allow_all())
            }
            500 if self.ignore_server_error => {
                debug!("robots.txt at {} returned 500, ignoring", robots_url);
                Ok(ParsedRobots::allow_all())
            }
            status => Err(RobotsError::Status { robots_url, status }),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value())
}
