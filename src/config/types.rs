use crate::ConfigError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure for Ripple-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URLs inserted into the frontier before the crawl starts
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
}

/// Crawler pacing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Minimum time between two requests across all workers (milliseconds)
    #[serde(rename = "interval-ms", default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Number of concurrent tick sequences
    #[serde(rename = "concurrency-limit", default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// How long a successfully crawled URL rests before it is crawled again
    #[serde(
        rename = "recrawl-interval-ms",
        default = "default_recrawl_interval_ms"
    )]
    pub recrawl_interval_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            concurrency_limit: default_concurrency_limit(),
            recrawl_interval_ms: default_recrawl_interval_ms(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Robots.txt policy
#[derive(Debug, Clone, Deserialize)]
pub struct RobotsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "cache-time-ms", default = "default_robots_cache_time_ms")]
    pub cache_time_ms: u64,

    /// Treat HTTP 500 on robots.txt as "no restrictions"
    #[serde(rename = "ignore-server-error", default)]
    pub ignore_server_error: bool,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_time_ms: default_robots_cache_time_ms(),
            ignore_server_error: false,
        }
    }
}

/// HTTP client options, merged over the built-in defaults
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// The configured extra headers as a request header map
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();
        for (raw_name, raw_value) in &self.headers {
            let name = HeaderName::from_bytes(raw_name.as_bytes()).map_err(|_| {
                ConfigError::Validation(format!("Invalid header name '{}'", raw_name))
            })?;
            let value = HeaderValue::from_str(raw_value).map_err(|_| {
                ConfigError::Validation(format!("Invalid value for header '{}'", raw_name))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Frontier backend selection
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum FrontierConfig {
    /// Process-local FIFO, no retry, nothing persisted
    Memory,

    /// SQLite database file
    Sqlite {
        #[serde(rename = "database-path", default = "default_database_path")]
        database_path: PathBuf,

        /// Delete every entry when the frontier is opened
        #[serde(default)]
        reset: bool,

        #[serde(
            rename = "initial-retry-time-ms",
            default = "default_initial_retry_time_ms"
        )]
        initial_retry_time_ms: u64,
    },

    /// Redis server shared by any number of workers
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,

        #[serde(rename = "key-prefix", default = "default_key_prefix")]
        key_prefix: String,

        #[serde(
            rename = "delay-half-life-ms",
            default = "default_delay_half_life_ms"
        )]
        delay_half_life_ms: u64,

        #[serde(rename = "expiry-time-ms", default = "default_expiry_time_ms")]
        expiry_time_ms: u64,

        #[serde(
            rename = "initial-retry-time-ms",
            default = "default_initial_retry_time_ms"
        )]
        initial_retry_time_ms: u64,
    },
}

impl Default for FrontierConfig {
    fn default() -> Self {
        FrontierConfig::Memory
    }
}

impl FrontierConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            FrontierConfig::Memory => "memory",
            FrontierConfig::Sqlite { .. } => "sqlite",
            FrontierConfig::Redis { .. } => "redis",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_recrawl_interval_ms() -> u64 {
    365 * 24 * 60 * 60 * 1000
}

fn default_robots_cache_time_ms() -> u64 {
    60 * 60 * 1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./crawl.db")
}

fn default_initial_retry_time_ms() -> u64 {
    60 * 60 * 1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "ripple:".to_string()
}

fn default_delay_half_life_ms() -> u64 {
    60 * 60 * 1000
}

fn default_expiry_time_ms() -> u64 {
    30 * 24 * 60 * 60 * 1000
}
