//! URL frontier
//!
//! The frontier is the set of known URLs together with their scheduling
//! metadata. Three backends implement the same [`Frontier`] trait:
//!
//! - [`MemoryFrontier`]: a process-local FIFO without retry
//! - [`RelationalFrontier`]: SQLite with optimistic claim updates
//! - [`SharedFrontier`]: a sorted set with atomic scripts and per-host delay,
//!   safe for many cooperating worker processes

mod backoff;
mod memory;
mod relational;
mod shared;

pub use backoff::{
    RetrySchedule, DEFAULT_INITIAL_RETRY, DEFAULT_LOCK_DURATION, DEFAULT_RECRAWL_INTERVAL,
};
pub use memory::MemoryFrontier;
pub use relational::{FrontierStats, RelationalFrontier};
pub use shared::{
    HostDelay, LocalStore, RedisStore, SharedFrontier, SharedStore, DEFAULT_DELAY_HALF_LIFE,
    DEFAULT_EXPIRY_TIME,
};

use crate::config::FrontierConfig;
use crate::url::CrawlUrl;
use crate::UrlError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors returned by frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    /// No entry is eligible right now. This is a control signal, not a fault.
    #[error("The frontier has been exhausted")]
    Exhausted,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Stored URL is invalid: {0}")]
    Url(#[from] UrlError),

    #[error("Frontier lock poisoned")]
    Poisoned,

    #[error("Frontier task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl FrontierError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Result type for frontier operations
pub type FrontierResult<T> = Result<T, FrontierError>;

/// The scheduling metadata a backend keeps next to a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: CrawlUrl,
    pub num_errors: u32,
    pub next_eligible_at: DateTime<Utc>,
}

/// A store of crawl targets that hands each eligible URL to one worker at a time
#[async_trait]
pub trait Frontier: Send + Sync {
    /// Adds the URL unless an entry with the same unique id exists
    ///
    /// Never overwrites the outcome of an existing entry.
    async fn insert_if_not_exists(&self, url: &CrawlUrl) -> FrontierResult<()>;

    /// Batched form of [`Frontier::insert_if_not_exists`]
    async fn insert_if_not_exists_bulk(&self, urls: &[CrawlUrl]) -> FrontierResult<()> {
        for url in urls {
            self.insert_if_not_exists(url).await?;
        }
        Ok(())
    }

    /// Records the outcome carried by `url`, inserting it if needed
    async fn upsert(&self, url: &CrawlUrl) -> FrontierResult<()>;

    /// Claims one eligible URL, or returns [`FrontierError::Exhausted`]
    async fn next_url(&self) -> FrontierResult<CrawlUrl>;

    /// Time until the soonest scheduled entry becomes claimable
    ///
    /// Zero when something is claimable now, `None` when nothing is scheduled
    /// or the backend never schedules into the future.
    async fn next_due_in(&self) -> FrontierResult<Option<Duration>> {
        Ok(None)
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Time from `now_ms` until `at_ms`, zero if already past
pub(crate) fn until(at_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(at_ms.saturating_sub(now_ms).max(0) as u64)
}

pub(crate) fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Opens the frontier backend selected by the configuration
pub async fn open_frontier(
    config: &FrontierConfig,
    recrawl_interval: Duration,
) -> FrontierResult<Arc<dyn Frontier>> {
    match config {
        FrontierConfig::Memory => {
            info!("Using in-memory frontier");
            Ok(Arc::new(MemoryFrontier::new()))
        }
        FrontierConfig::Sqlite {
            database_path,
            reset,
            initial_retry_time_ms,
        } => {
            info!("Using SQLite frontier at {}", database_path.display());
            let schedule = RetrySchedule::new(
                Duration::from_millis(*initial_retry_time_ms),
                recrawl_interval,
            );
            let frontier = RelationalFrontier::open(database_path, schedule)?;
            if *reset {
                frontier.reset()?;
            }
            Ok(Arc::new(frontier))
        }
        FrontierConfig::Redis {
            url,
            key_prefix,
            delay_half_life_ms,
            expiry_time_ms,
            initial_retry_time_ms,
        } => {
            info!("Using Redis frontier at {}", url);
            let store = RedisStore::connect(url, key_prefix).await?;
            let frontier = SharedFrontier::new(store)
                .with_delay_half_life(Duration::from_millis(*delay_half_life_ms))
                .with_expiry_time(Duration::from_millis(*expiry_time_ms))
                .with_initial_retry(Duration::from_millis(*initial_retry_time_ms));
            Ok(Arc::new(frontier))
        }
    }
}
