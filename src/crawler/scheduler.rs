//! The crawl loop
//!
//! A [`Crawler`] runs `concurrency_limit` tick sequences as tokio tasks. Every
//! tick reserves a request slot from one shared throttle, so the aggregate
//! request rate never exceeds one per `interval` no matter how many sequences
//! are running.

use crate::config::Config;
use crate::crawler::events::{CrawlEvent, EventSink};
use crate::crawler::fetcher::{ReqwestTransport, Transport, TransportOptions, UserAgent};
use crate::crawler::pipeline::Pipeline;
use crate::frontier::{Frontier, FrontierError, MemoryFrontier};
use crate::handlers::{default_registry, ContentTypeMatcher, Handler, HandlerRegistry};
use crate::robots::{RobotsGate, DEFAULT_ROBOTS_CACHE_TIME};
use crate::url::{CrawlUrl, ErrorCode};
use crate::RippleError;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// How far ahead [`Crawler::run_until_exhausted`] looks for entries that are
/// scheduled but not yet claimable before it gives up
pub const EXHAUSTION_HORIZON: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct SchedulerState {
    run: RunState,
    /// Bumped on every start so sequences from an earlier run retire
    generation: u64,
    last_request: Option<Instant>,
}

/// What a tick sequence should do next
enum Slot {
    Go,
    Wait(Duration),
    Retire,
}

struct Inner {
    frontier: Arc<dyn Frontier>,
    pipeline: Arc<Pipeline>,
    events: Arc<EventSink>,
    interval: Duration,
    concurrency_limit: usize,
    state: Mutex<SchedulerState>,
    in_flight: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A rate-limited crawler over a [`Frontier`]
///
/// Cloning yields another handle to the same crawler.
///
/// # Example
///
/// ```no_run
/// use ripple_crawl::{Crawler, CrawlUrl, Frontier, MemoryFrontier};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn run() -> ripple_crawl::Result<()> {
/// let frontier = Arc::new(MemoryFrontier::new());
/// frontier
///     .insert_if_not_exists(&CrawlUrl::parse("https://example.com/")?)
///     .await?;
///
/// let crawler = Crawler::builder()
///     .frontier(frontier)
///     .interval(Duration::from_millis(500))
///     .build()?;
/// crawler.run_until_exhausted().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<Inner>,
}

impl Crawler {
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    /// Starts the tick sequences; returns `false` if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let generation = {
            let mut state = self.inner.lock_state();
            if state.run == RunState::Running {
                return false;
            }
            state.run = RunState::Running;
            state.generation += 1;
            state.generation
        };

        info!(
            "Starting crawler with {} sequences, interval {:?}",
            self.inner.concurrency_limit, self.inner.interval
        );

        let handles: Vec<JoinHandle<()>> = (0..self.inner.concurrency_limit)
            .map(|_| tokio::spawn(tick_loop(self.inner.clone(), generation)))
            .collect();

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        true
    }

    /// Prevents new ticks; work already claimed runs to completion
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        if state.run == RunState::Running {
            info!("Stopping crawler");
            state.run = RunState::Stopped;
        }
    }

    /// Stops and waits for every tick sequence to finish
    pub async fn shutdown(&self) {
        self.stop();

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Tick sequence ended abnormally: {}", e);
            }
        }
    }

    /// Crawls until nothing is eligible and nothing is in flight, then shuts down
    ///
    /// An exhausted frontier only ends the run when no entry becomes claimable
    /// within [`EXHAUSTION_HORIZON`]. Backends that delay fresh admissions
    /// would otherwise stop right after the first page.
    pub async fn run_until_exhausted(&self) -> crate::Result<()> {
        let mut events = self.subscribe();
        if !self.start() {
            return Err(RippleError::AlreadyRunning);
        }

        while let Some(event) = events.recv().await {
            if event != CrawlEvent::FrontierExhausted {
                continue;
            }

            match self.inner.frontier.next_due_in().await {
                Ok(Some(due)) if due <= EXHAUSTION_HORIZON => {
                    debug!("Next entry due in {:?}, crawl continues", due);
                    tokio::time::sleep(due).await;
                    // Exhaustion reports queued while sleeping are stale
                    while events.try_recv().is_ok() {}
                }
                Ok(_) => break,
                Err(e) => {
                    error!("Cannot tell whether the frontier is drained: {}", e);
                    self.shutdown().await;
                    return Err(e.into());
                }
            }
        }

        self.shutdown().await;
        info!("Frontier exhausted, crawl complete");
        Ok(())
    }

    /// Receives every event emitted after this call
    pub fn subscribe(&self) -> UnboundedReceiver<CrawlEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().run == RunState::Running
    }

    pub fn frontier(&self) -> Arc<dyn Frontier> {
        self.inner.frontier.clone()
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the next request slot under the throttle lock
    fn reserve_slot(&self, generation: u64) -> Slot {
        let mut state = self.lock_state();
        if state.run != RunState::Running || state.generation != generation {
            return Slot::Retire;
        }

        let now = Instant::now();
        if let Some(last) = state.last_request {
            let ready_at = last + self.interval;
            if ready_at > now {
                return Slot::Wait(ready_at - now);
            }
        }

        state.last_request = Some(now);
        Slot::Go
    }

    async fn tick(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        match self.frontier.next_url().await {
            Ok(url) => {
                self.events.emit(CrawlEvent::CrawlUrl(url.to_string()));

                let outcome = self.process(url).await;
                if let Err(e) = self.frontier.upsert(&outcome).await {
                    error!("Failed to record outcome for {}: {}", outcome, e);
                    self.events.emit(CrawlEvent::FrontierError {
                        message: e.to_string(),
                    });
                }

                self.events.emit(CrawlEvent::UrlCrawled {
                    url: outcome.to_string(),
                    error_code: outcome.error_code(),
                    status_code: outcome.status_code(),
                });
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Err(FrontierError::Exhausted) => {
                let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                self.events.emit(CrawlEvent::FrontierEmpty);
                if remaining == 0 {
                    debug!("Frontier exhausted with no work in flight");
                    self.events.emit(CrawlEvent::FrontierExhausted);
                }
            }
            Err(e) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                error!("Frontier error: {}", e);
                self.events.emit(CrawlEvent::FrontierError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Runs the pipeline on its own task so a panicking handler only fails
    /// this URL
    async fn process(&self, url: CrawlUrl) -> CrawlUrl {
        let pipeline = self.pipeline.clone();
        let claimed = url.clone();

        match tokio::spawn(async move { pipeline.process(&claimed).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Processing {} aborted: {}", url, e);
                url.with_error(ErrorCode::OtherError, None, e.to_string())
            }
        }
    }
}

async fn tick_loop(inner: Arc<Inner>, generation: u64) {
    loop {
        match inner.reserve_slot(generation) {
            Slot::Retire => return,
            Slot::Wait(delay) => {
                tokio::time::sleep(delay).await;
                continue;
            }
            Slot::Go => {}
        }

        inner.tick().await;
        // Backends without await points would otherwise starve the runtime
        // when the interval is zero.
        tokio::task::yield_now().await;
    }
}

/// Assembles a [`Crawler`]
pub struct CrawlerBuilder {
    frontier: Option<Arc<dyn Frontier>>,
    transport: Option<Arc<dyn Transport>>,
    interval: Duration,
    concurrency_limit: usize,
    user_agent: UserAgent,
    robots_enabled: bool,
    robots_cache_time: Duration,
    robots_ignore_server_error: bool,
    headers: HeaderMap,
    handlers: HandlerRegistry,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerBuilder {
    /// Defaults: in-memory frontier, reqwest transport, the built-in handlers,
    /// robots.txt respected
    pub fn new() -> Self {
        Self {
            frontier: None,
            transport: None,
            interval: DEFAULT_INTERVAL,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            user_agent: UserAgent::default(),
            robots_enabled: true,
            robots_cache_time: DEFAULT_ROBOTS_CACHE_TIME,
            robots_ignore_server_error: false,
            headers: HeaderMap::new(),
            handlers: default_registry(),
        }
    }

    /// Applies every setting of a loaded configuration except the frontier,
    /// which is opened separately with [`crate::frontier::open_frontier`]
    pub fn from_config(config: &Config) -> Result<Self, RippleError> {
        let transport = ReqwestTransport::new(&TransportOptions::from(&config.transport))?;
        let headers = config.transport.header_map()?;

        Ok(Self::new()
            .transport(Arc::new(transport))
            .interval(Duration::from_millis(config.crawler.interval_ms))
            .concurrency_limit(config.crawler.concurrency_limit)
            .user_agent(UserAgent::from_config(&config.user_agent))
            .robots_enabled(config.robots.enabled)
            .robots_cache_time(Duration::from_millis(config.robots.cache_time_ms))
            .robots_ignore_server_error(config.robots.ignore_server_error)
            .headers(headers))
    }

    pub fn frontier(mut self, frontier: Arc<dyn Frontier>) -> Self {
        self.frontier = Some(frontier);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Minimum time between two requests across all sequences
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Number of tick sequences; at least one always runs
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn user_agent(mut self, user_agent: UserAgent) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn robots_enabled(mut self, enabled: bool) -> Self {
        self.robots_enabled = enabled;
        self
    }

    pub fn robots_cache_time(mut self, cache_time: Duration) -> Self {
        self.robots_cache_time = cache_time;
        self
    }

    pub fn robots_ignore_server_error(mut self, ignore: bool) -> Self {
        self.robots_ignore_server_error = ignore;
        self
    }

    /// Extra headers sent with every request, robots.txt included
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the handler registry
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Adds a handler after the ones already registered
    pub fn add_handler<H>(mut self, content_type: impl Into<ContentTypeMatcher>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.handlers.add_handler(content_type, handler);
        self
    }

    pub fn build(self) -> Result<Crawler, RippleError> {
        let frontier = self
            .frontier
            .unwrap_or_else(|| Arc::new(MemoryFrontier::new()));
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&TransportOptions::default())?),
        };

        let robots = self.robots_enabled.then(|| {
            RobotsGate::new(transport.clone(), frontier.clone(), self.user_agent.clone())
                .with_cache_time(self.robots_cache_time)
                .with_ignore_server_error(self.robots_ignore_server_error)
                .with_headers(self.headers.clone())
        });

        let events = Arc::new(EventSink::default());
        let pipeline = Pipeline {
            frontier: frontier.clone(),
            transport,
            robots,
            handlers: self.handlers,
            user_agent: self.user_agent,
            headers: self.headers,
            events: events.clone(),
        };

        Ok(Crawler {
            inner: Arc::new(Inner {
                frontier,
                pipeline: Arc::new(pipeline),
                events,
                interval: self.interval,
                concurrency_limit: self.concurrency_limit,
                state: Mutex::new(SchedulerState {
                    run: RunState::Idle,
                    generation: 0,
                    last_request: None,
                }),
                in_flight: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::{FetchRequest, FetchResponse, TransportError};
    use async_trait::async_trait;

    /// Answers every request with an empty 200 and records when it was asked
    #[derive(Default)]
    struct CountingTransport {
        sent: Mutex<Vec<std::time::Instant>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: FetchRequest) -> Result<FetchResponse, TransportError> {
            self.sent.lock().unwrap().push(std::time::Instant::now());
            Ok(FetchResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Vec::new(),
            })
        }
    }

    async fn seeded_frontier(count: usize) -> Arc<MemoryFrontier> {
        let frontier = Arc::new(MemoryFrontier::new());
        for i in 0..count {
            let url = CrawlUrl::parse(&format!("https://example.com/{}", i)).unwrap();
            frontier.insert_if_not_exists(&url).await.unwrap();
        }
        frontier
    }

    fn crawler(
        frontier: Arc<MemoryFrontier>,
        transport: Arc<CountingTransport>,
        interval: Duration,
        concurrency: usize,
    ) -> Crawler {
        Crawler::builder()
            .frontier(frontier)
            .transport(transport)
            .interval(interval)
            .concurrency_limit(concurrency)
            .robots_enabled(false)
            .handlers(HandlerRegistry::new())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_twice_returns_false() {
        let frontier = seeded_frontier(0).await;
        let crawler = crawler(
            frontier,
            Arc::new(CountingTransport::default()),
            Duration::from_millis(10),
            1,
        );

        assert!(crawler.start());
        assert!(!crawler.start());
        assert!(crawler.is_running());

        crawler.shutdown().await;
        assert!(!crawler.is_running());
    }

    #[tokio::test]
    async fn test_run_until_exhausted_records_outcomes() {
        let frontier = seeded_frontier(3).await;
        let transport = Arc::new(CountingTransport::default());
        let crawler = crawler(frontier.clone(), transport.clone(), Duration::ZERO, 2);

        crawler.run_until_exhausted().await.unwrap();

        assert_eq!(transport.sent.lock().unwrap().len(), 3);
        for i in 0..3 {
            let url = CrawlUrl::parse(&format!("https://example.com/{}", i)).unwrap();
            let stored = frontier.get(&url).unwrap();
            assert_eq!(stored.status_code(), Some(200));
        }
        assert!(!crawler.is_running());
    }

    #[tokio::test]
    async fn test_run_until_exhausted_waits_for_delayed_admissions() {
        use crate::frontier::{LocalStore, SharedFrontier};

        // Same-host admissions are spread a millisecond apart, so most of
        // them are not claimable when the first tick runs
        let frontier = Arc::new(SharedFrontier::new(LocalStore::new()));
        let urls: Vec<CrawlUrl> = (0..20)
            .map(|i| CrawlUrl::parse(&format!("https://example.com/{}", i)).unwrap())
            .collect();
        frontier.insert_if_not_exists_bulk(&urls).await.unwrap();

        let transport = Arc::new(CountingTransport::default());
        let crawler = Crawler::builder()
            .frontier(frontier)
            .transport(transport.clone())
            .interval(Duration::ZERO)
            .concurrency_limit(1)
            .robots_enabled(false)
            .handlers(HandlerRegistry::new())
            .build()
            .unwrap();

        crawler.run_until_exhausted().await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_run_until_exhausted_rejects_running_crawler() {
        let frontier = seeded_frontier(0).await;
        let crawler = crawler(
            frontier,
            Arc::new(CountingTransport::default()),
            Duration::from_millis(10),
            1,
        );

        crawler.start();
        assert!(matches!(
            crawler.run_until_exhausted().await,
            Err(RippleError::AlreadyRunning)
        ));
        crawler.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_in_order_for_one_url() {
        let frontier = seeded_frontier(1).await;
        let crawler = crawler(
            frontier,
            Arc::new(CountingTransport::default()),
            Duration::ZERO,
            1,
        );
        let mut events = crawler.subscribe();

        crawler.run_until_exhausted().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen[0],
            CrawlEvent::CrawlUrl("https://example.com/0".to_string())
        );
        assert!(seen.contains(&CrawlEvent::UrlCrawled {
            url: "https://example.com/0".to_string(),
            error_code: None,
            status_code: Some(200),
        }));
        assert_eq!(seen.last(), Some(&CrawlEvent::FrontierExhausted));
    }

    #[tokio::test]
    async fn test_throttle_bounds_request_count() {
        let interval = Duration::from_millis(50);
        let concurrency = 4;
        let frontier = seeded_frontier(1000).await;
        let transport = Arc::new(CountingTransport::default());
        let crawler = crawler(frontier, transport.clone(), interval, concurrency);

        let started = std::time::Instant::now();
        crawler.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        crawler.shutdown().await;
        let elapsed = started.elapsed();

        let attempts = transport.sent.lock().unwrap().len();
        let bound = (elapsed.as_millis() / interval.as_millis()) as usize + concurrency;
        assert!(attempts > 0);
        assert!(
            attempts <= bound,
            "{} attempts in {:?} exceeds {}",
            attempts,
            elapsed,
            bound
        );
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let frontier = seeded_frontier(0).await;
        let crawler = crawler(
            frontier,
            Arc::new(CountingTransport::default()),
            Duration::from_millis(10),
            2,
        );

        assert!(crawler.start());
        crawler.stop();
        assert!(!crawler.is_running());
        assert!(crawler.start());
        crawler.shutdown().await;
    }

    #[test]
    fn test_from_config_applies_configured_headers() {
        let mut config: Config = crate::config::parse_config(
            r#"
[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"
"#,
        )
        .unwrap();
        config
            .transport
            .headers
            .insert("X-Crawl".to_string(), "yes".to_string());

        let builder = CrawlerBuilder::from_config(&config).unwrap();
        assert_eq!(builder.headers.get("x-crawl").unwrap(), "yes");

        config
            .transport
            .headers
            .insert("bad name".to_string(), "x".to_string());
        assert!(matches!(
            CrawlerBuilder::from_config(&config),
            Err(RippleError::Config(crate::ConfigError::Validation(_)))
        ));
    }
}
