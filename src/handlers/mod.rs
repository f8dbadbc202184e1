//! Content handlers
//!
//! A handler receives a fetched body and returns the links it found. Handlers
//! are registered against a content type in a [`HandlerRegistry`]; the crawler
//! dispatches every 2xx response to all matching handlers in order.

mod html_links;
mod registry;
mod robots_sitemaps;
mod sitemaps;

pub use html_links::HtmlLinkHandler;
pub use registry::{ContentTypeMatcher, DispatchError, HandlerRegistry};
pub use robots_sitemaps::RobotsSitemapHandler;
pub use sitemaps::{SitemapHandler, DEFAULT_GZIP_CONTENT_TYPES};

use async_trait::async_trait;
use std::borrow::Cow;
use url::Url;

/// Everything a handler gets to see about one response
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub body: Vec<u8>,
    pub url: Url,
    /// Media type without parameters, e.g. `text/html`
    pub content_type: String,
}

impl HandlerContext {
    /// The body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Extracts links from a response body
///
/// `Ok(None)` means the handler had nothing to say about the links. Returned
/// strings may be relative; the crawler resolves them against the page URL.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, context: &HandlerContext) -> anyhow::Result<Option<Vec<String>>>;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&HandlerContext) -> anyhow::Result<Option<Vec<String>>> + Send + Sync,
{
    async fn handle(&self, context: &HandlerContext) -> anyhow::Result<Option<Vec<String>>> {
        self(context)
    }
}

/// Registry with the HTML, robots.txt and sitemap handlers installed
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.add_handler("text/html", HtmlLinkHandler::new());
    registry.add_handler("text/plain", RobotsSitemapHandler::new());
    registry.add_handler("application/xml", SitemapHandler::new());
    registry.add_handler("text/xml", SitemapHandler::new());
    for content_type in DEFAULT_GZIP_CONTENT_TYPES {
        registry.add_handler(content_type, SitemapHandler::new());
    }
    registry
}
