//! Multi-worker frontier over a shared sorted set
//!
//! Entries live in a sorted set scored by the time they become eligible.
//! Every compound step (admit, claim, record success, record failure) runs as
//! one atomic operation inside the store, so any number of worker processes
//! can share one crawl without further coordination.
//!
//! Newly admitted URLs are pushed back by a per-host delay that grows by one
//! millisecond per admission and decays exponentially with a configurable
//! half-life. A sitemap that yields thousands of URLs for one host therefore
//! spreads them out instead of starving every other host.

mod local;
mod redis_store;

pub use local::LocalStore;
pub use redis_store::RedisStore;

use super::backoff::duration_ms;
use super::{now_ms, until, Frontier, FrontierError, FrontierResult, DEFAULT_INITIAL_RETRY, DEFAULT_LOCK_DURATION};
use crate::url::{extract_host, CrawlUrl, ErrorCode};
use async_trait::async_trait;
use std::time::Duration;

/// One hour
pub const DEFAULT_DELAY_HALF_LIFE: Duration = Duration::from_secs(60 * 60);

/// Thirty days before a successfully crawled URL is offered again
pub const DEFAULT_EXPIRY_TIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Decaying admission delay of one host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostDelay {
    pub delay_ms: f64,
    pub last_update_ms: i64,
}

impl HostDelay {
    /// Delay after admitting one more URL at `now_ms`
    ///
    /// `current * exp(ln(0.5) / half_life * elapsed) + 1`
    pub fn admit(previous: Option<HostDelay>, now_ms: i64, half_life_ms: i64) -> HostDelay {
        let (current, last) = previous
            .map(|p| (p.delay_ms, p.last_update_ms))
            .unwrap_or((0.0, now_ms));
        let elapsed = (now_ms - last) as f64;
        let half_life = half_life_ms.max(1) as f64;
        let decayed = current * ((0.5f64).ln() / half_life * elapsed).exp();
        HostDelay {
            delay_ms: decayed + 1.0,
            last_update_ms: now_ms,
        }
    }
}

/// A URL admitted together with its host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub host: String,
    pub member: String,
}

/// Failure details written to the error side table
#[derive(Debug, Clone, Copy)]
pub struct FailureRecord<'a> {
    pub status_code: Option<u16>,
    pub error_code: &'a str,
    pub error_message: &'a str,
}

/// A claimed member with whatever failure details are on record for it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimedMember {
    pub member: String,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Atomic operations required of a shared frontier store
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Adds every member not already scheduled, at `now + host delay`
    async fn admit_bulk(
        &self,
        admissions: &[Admission],
        now_ms: i64,
        half_life_ms: i64,
    ) -> FrontierResult<()>;

    /// Takes the lowest-scored member with score <= now and re-scores it to
    /// `now + lock_ms`
    async fn claim(&self, now_ms: i64, lock_ms: i64) -> FrontierResult<Option<ClaimedMember>>;

    /// Clears error details and schedules the member at `next_ms`
    async fn record_success(&self, member: &str, next_ms: i64) -> FrontierResult<()>;

    /// Increments the error count, stores the details and schedules the member
    /// at `now + initial_retry * 2^(num_errors - 1)`. Returns the new count.
    async fn record_failure(
        &self,
        member: &str,
        now_ms: i64,
        initial_retry_ms: i64,
        failure: FailureRecord<'_>,
    ) -> FrontierResult<u32>;

    /// Lowest score in the schedule, claimed members included
    async fn soonest_score(&self) -> FrontierResult<Option<i64>>;
}

/// Frontier over a [`SharedStore`]
pub struct SharedFrontier<S> {
    store: S,
    delay_half_life: Duration,
    expiry_time: Duration,
    initial_retry: Duration,
    lock_duration: Duration,
}

impl<S: SharedStore> SharedFrontier<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            delay_half_life: DEFAULT_DELAY_HALF_LIFE,
            expiry_time: DEFAULT_EXPIRY_TIME,
            initial_retry: DEFAULT_INITIAL_RETRY,
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }

    pub fn with_delay_half_life(mut self, half_life: Duration) -> Self {
        self.delay_half_life = half_life;
        self
    }

    pub fn with_expiry_time(mut self, expiry: Duration) -> Self {
        self.expiry_time = expiry;
        self
    }

    pub fn with_initial_retry(mut self, initial_retry: Duration) -> Self {
        self.initial_retry = initial_retry;
        self
    }

    pub fn with_lock_duration(mut self, lock: Duration) -> Self {
        self.lock_duration = lock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

fn admission(url: &CrawlUrl) -> Admission {
    Admission {
        host: extract_host(url.address()),
        member: url.unique_id().to_string(),
    }
}

#[async_trait]
impl<S: SharedStore> Frontier for SharedFrontier<S> {
    async fn insert_if_not_exists(&self, url: &CrawlUrl) -> FrontierResult<()> {
        self.insert_if_not_exists_bulk(std::slice::from_ref(url)).await
    }

    async fn insert_if_not_exists_bulk(&self, urls: &[CrawlUrl]) -> FrontierResult<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let admissions: Vec<Admission> = urls.iter().map(admission).collect();
        self.store
            .admit_bulk(&admissions, now_ms(), duration_ms(self.delay_half_life))
            .await
    }

    async fn upsert(&self, url: &CrawlUrl) -> FrontierResult<()> {
        let now = now_ms();

        if let Some(code) = url.error_code() {
            let failure = FailureRecord {
                status_code: url.status_code(),
                error_code: code.as_str(),
                error_message: url.error_message().unwrap_or(""),
            };
            self.store
                .record_failure(
                    url.unique_id(),
                    now,
                    duration_ms(self.initial_retry),
                    failure,
                )
                .await?;
            Ok(())
        } else if url.status_code().is_some() {
            let next = now.saturating_add(duration_ms(self.expiry_time));
            self.store.record_success(url.unique_id(), next).await
        } else {
            self.insert_if_not_exists(url).await
        }
    }

    async fn next_url(&self) -> FrontierResult<CrawlUrl> {
        let claimed = self
            .store
            .claim(now_ms(), duration_ms(self.lock_duration))
            .await?
            .ok_or(FrontierError::Exhausted)?;

        let error_code = claimed
            .error_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .map(str::parse::<ErrorCode>)
            .transpose()?;

        Ok(CrawlUrl::from_parts(
            &claimed.member,
            claimed.status_code,
            error_code,
            claimed.error_message,
        )?)
    }

    async fn next_due_in(&self) -> FrontierResult<Option<Duration>> {
        let soonest = self.store.soonest_score().await?;
        Ok(soonest.map(|score| until(score, now_ms())))
    }
}
