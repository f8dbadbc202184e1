use super::{Handler, HandlerContext};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// A handler failed; any links gathered so far were discarded
#[derive(Debug, Error)]
#[error("Handler for {content_type} failed on {url}: {message}")]
pub struct DispatchError {
    pub url: String,
    pub content_type: String,
    pub message: String,
}

/// Which content types a handler is registered for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeMatcher {
    /// `*`: every response
    Any,
    /// A bare type such as `text`, matching `text/html`, `text/plain`, ...
    Type(String),
    /// A full media type such as `text/html`
    Exact(String),
}

impl ContentTypeMatcher {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" || pattern.is_empty() {
            ContentTypeMatcher::Any
        } else if pattern.contains('/') {
            ContentTypeMatcher::Exact(pattern)
        } else {
            ContentTypeMatcher::Type(pattern)
        }
    }

    /// `content_type` is the media type essence (no parameters)
    pub fn matches(&self, content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        match self {
            ContentTypeMatcher::Any => true,
            ContentTypeMatcher::Type(ty) => content_type
                .split('/')
                .next()
                .map_or(false, |prefix| prefix == ty),
            ContentTypeMatcher::Exact(essence) => content_type == *essence,
        }
    }
}

impl From<&str> for ContentTypeMatcher {
    fn from(pattern: &str) -> Self {
        ContentTypeMatcher::parse(pattern)
    }
}

/// Ordered list of content-type matchers and their handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<(ContentTypeMatcher, Arc<dyn Handler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for a content type pattern (`*`, `text`, `text/html`)
    pub fn add_handler<H>(&mut self, content_type: impl Into<ContentTypeMatcher>, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.push((content_type.into(), Arc::new(handler)));
    }

    /// Registers `handler` for every content type
    pub fn add_handler_for_all<H>(&mut self, handler: H)
    where
        H: Handler + 'static,
    {
        self.add_handler(ContentTypeMatcher::Any, handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every matching handler in registration order and concatenates
    /// their links
    pub async fn dispatch(&self, context: &HandlerContext) -> Result<Vec<String>, DispatchError> {
        let mut links = Vec::new();

        for (matcher, handler) in &self.handlers {
            if !matcher.matches(&context.content_type) {
                continue;
            }

            match handler.handle(context).await {
                Ok(Some(found)) => {
                    trace!("Handler {:?} found {} links", matcher, found.len());
                    links.extend(found);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(DispatchError {
                        url: context.url.to_string(),
                        content_type: context.content_type.clone(),
                        message: format!("{:#}", e),
                    })
                }
            }
        }

        Ok(links)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(matcher, _)| matcher))
            .finish()
    }
}
