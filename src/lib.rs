//! Ripple-Crawl: a polite, resumable web crawler engine
//!
//! This crate drives a rate-limited crawl over a URL frontier. The frontier can
//! live in memory, in SQLite, or in Redis; the latter two let several worker
//! processes cooperate on one crawl without fetching the same URL twice.
//! Robots.txt is respected, and links are discovered by pluggable content
//! handlers keyed by content type.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod handlers;
pub mod robots;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Crawl operations
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawler is already running")]
    AlreadyRunning,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Unknown error code: {0}")]
    UnknownErrorCode(String),
}

/// Result type alias for Ripple-Crawl operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEvent, Crawler, CrawlerBuilder};
pub use frontier::{Frontier, FrontierError, MemoryFrontier, RelationalFrontier, SharedFrontier};
pub use handlers::{Handler, HandlerContext, HandlerRegistry};
pub use url::{normalize_url, CrawlUrl, ErrorCode};
