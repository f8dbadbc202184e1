//! Crawler module
//!
//! This module contains the core crawling logic:
//! - the HTTP transport seam and its reqwest implementation
//! - the per-URL pipeline (robots, fetch, handlers, link queueing)
//! - the rate-limited scheduler and its lifecycle events

mod events;
mod fetcher;
mod pipeline;
mod scheduler;

pub use events::CrawlEvent;
pub use fetcher::{
    FetchRequest, FetchResponse, ReqwestTransport, Transport, TransportError, TransportOptions,
    UserAgent,
};
pub use scheduler::{
    Crawler, CrawlerBuilder, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_INTERVAL, EXHAUSTION_HORIZON,
};
