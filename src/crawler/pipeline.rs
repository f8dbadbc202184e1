//! Processing of a single claimed URL
//!
//! robots check → fetch → classify response → dispatch to handlers → queue
//! discovered links. Every stage failure is folded into the returned
//! [`CrawlUrl`] so the caller always has an outcome to record.

use crate::crawler::events::{CrawlEvent, EventSink};
use crate::crawler::fetcher::{FetchRequest, FetchResponse, Transport, UserAgent};
use crate::frontier::Frontier;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::robots::{RobotsDecision, RobotsError, RobotsGate};
use crate::url::{resolve_link, CrawlUrl, ErrorCode};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION, USER_AGENT};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

/// Used when neither the header nor the path says what a body is
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A stage failed; becomes the error half of the outcome
#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    status: Option<u16>,
    message: String,
}

impl Failure {
    fn new(code: ErrorCode, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }
}

pub(crate) struct Pipeline {
    pub(crate) frontier: Arc<dyn Frontier>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) robots: Option<RobotsGate>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) user_agent: UserAgent,
    pub(crate) headers: HeaderMap,
    pub(crate) events: Arc<EventSink>,
}

impl Pipeline {
    /// Runs every stage for `url` and returns it with its outcome attached
    pub(crate) async fn process(&self, url: &CrawlUrl) -> CrawlUrl {
        match self.run(url).await {
            Ok(status) => url.with_status(status),
            Err(failure) => {
                debug!(
                    "{} failed with {}: {}",
                    url, failure.code, failure.message
                );
                url.with_error(failure.code, failure.status, failure.message)
            }
        }
    }

    async fn run(&self, url: &CrawlUrl) -> Result<u16, Failure> {
        self.check_robots(url).await?;

        let response = self.fetch(url).await?;
        let links = self.extract_links(url, &response).await?;
        self.queue_links(url, links).await?;

        Ok(response.status)
    }

    async fn check_robots(&self, url: &CrawlUrl) -> Result<(), Failure> {
        let gate = match &self.robots {
            Some(gate) => gate,
            None => return Ok(()),
        };

        match gate.check_allowed(url).await {
            Ok(RobotsDecision::Allowed) => Ok(()),
            Ok(RobotsDecision::Denied) => Err(Failure::new(
                ErrorCode::RobotsNotAllowed,
                None,
                "Disallowed by robots.txt",
            )),
            Err(e) => {
                if let RobotsError::Transport { robots_url, source } = &e {
                    self.events.emit(CrawlEvent::TransportError {
                        url: robots_url.clone(),
                        message: source.to_string(),
                    });
                }
                warn!("Denying {}: {}", url, e);
                Err(Failure::new(ErrorCode::RobotsNotAllowed, None, e.to_string()))
            }
        }
    }

    async fn fetch(&self, url: &CrawlUrl) -> Result<FetchResponse, Failure> {
        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent.for_url(url.address())) {
            headers.insert(USER_AGENT, value);
        }

        let request = FetchRequest {
            url: url.address().clone(),
            headers,
            follow_redirects: false,
        };

        match self.transport.send(request).await {
            Ok(response) => {
                trace!("{} returned HTTP {}", url, response.status);
                Ok(response)
            }
            Err(e) => {
                let message = e.to_string();
                self.events.emit(CrawlEvent::TransportError {
                    url: url.to_string(),
                    message: message.clone(),
                });
                Err(Failure::new(ErrorCode::RequestError, None, message))
            }
        }
    }

    /// Raw links from a redirect target or the registered handlers
    async fn extract_links(
        &self,
        url: &CrawlUrl,
        response: &FetchResponse,
    ) -> Result<Vec<String>, Failure> {
        let status = response.status;

        match status {
            200..=299 => {}
            300..=399 => {
                let location = response
                    .header(LOCATION.as_str())
                    .filter(|location| !location.trim().is_empty())
                    .ok_or_else(|| {
                        Failure::new(
                            ErrorCode::HttpError,
                            Some(status),
                            format!("HTTP {} without Location", status),
                        )
                    })?;

                let target = resolve_link(location, url.address())
                    .map(|target| target.to_string())
                    .ok_or_else(|| {
                        Failure::new(
                            ErrorCode::HttpError,
                            Some(status),
                            format!("HTTP {} with unusable Location {:?}", status, location),
                        )
                    })?;

                self.events.emit(CrawlEvent::Redirect {
                    from: url.to_string(),
                    to: target.clone(),
                });
                return Ok(vec![target]);
            }
            _ => {
                return Err(Failure::new(
                    ErrorCode::HttpError,
                    Some(status),
                    format!("HTTP {}", status),
                ))
            }
        }

        let context = HandlerContext {
            body: response.body.clone(),
            url: url.address().clone(),
            content_type: content_type_of(response, url.address()),
        };

        self.handlers.dispatch(&context).await.map_err(|e| {
            self.events.emit(CrawlEvent::HandlersError {
                url: url.to_string(),
                message: e.message.clone(),
            });
            Failure::new(ErrorCode::HandlersError, Some(status), e.to_string())
        })
    }

    async fn queue_links(&self, url: &CrawlUrl, raw: Vec<String>) -> Result<(), Failure> {
        let mut links = Vec::with_capacity(raw.len());
        for href in raw {
            match resolve_link(&href, url.address()) {
                Some(resolved) => links.push(CrawlUrl::from_url(resolved)),
                None => debug!("Dropping unusable link {:?} found on {}", href, url),
            }
        }

        self.events.emit(CrawlEvent::Links {
            url: url.to_string(),
            links: links.iter().map(|link| link.to_string()).collect(),
        });

        if links.is_empty() {
            return Ok(());
        }

        self.frontier
            .insert_if_not_exists_bulk(&links)
            .await
            .map_err(|e| {
                Failure::new(
                    ErrorCode::OtherError,
                    None,
                    format!("Failed to queue links: {}", e),
                )
            })
    }
}

/// Media type essence from the `Content-Type` header, else inferred from the
/// path extension
fn content_type_of(response: &FetchResponse, url: &Url) -> String {
    let declared = response
        .header(CONTENT_TYPE.as_str())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|mime| mime.essence_str().to_ascii_lowercase());

    declared
        .or_else(|| infer_from_extension(url.path()).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

fn infer_from_extension(path: &str) -> Option<&'static str> {
    let file = path.rsplit('/').next()?;
    let (_, extension) = file.rsplit_once('.')?;

    let content_type = match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "gz" => "application/gzip",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(content_type)
}
