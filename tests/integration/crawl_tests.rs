//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use ripple_crawl::config::UserAgentConfig;
use ripple_crawl::crawler::UserAgent;
use ripple_crawl::frontier::{LocalStore, RelationalFrontier, RetrySchedule, SharedFrontier};
use ripple_crawl::handlers::HandlerContext;
use ripple_crawl::url::{CrawlUrl, ErrorCode};
use ripple_crawl::{CrawlEvent, Crawler, Frontier, MemoryFrontier};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

fn robots(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/plain")
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

fn page(server: &MockServer, route: &str) -> CrawlUrl {
    CrawlUrl::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

fn test_user_agent() -> UserAgent {
    UserAgent::from_config(&UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    })
}

async fn seeded(server: &MockServer, route: &str) -> Arc<MemoryFrontier> {
    let frontier = Arc::new(MemoryFrontier::new());
    frontier
        .insert_if_not_exists(&page(server, route))
        .await
        .unwrap();
    frontier
}

fn fast_crawler(frontier: Arc<dyn Frontier>) -> ripple_crawl::CrawlerBuilder {
    Crawler::builder()
        .frontier(frontier)
        .interval(Duration::ZERO)
        .concurrency_limit(2)
        .user_agent(test_user_agent())
}

fn drain(events: &mut UnboundedReceiver<CrawlEvent>) -> Vec<CrawlEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_full_crawl_follows_links() {
    let server = MockServer::start().await;
    mount(&server, "/robots.txt", robots("User-agent: *\nAllow: /")).await;
    mount(
        &server,
        "/",
        html(r#"<html><body><a href="/a">A</a><a href="/missing">Missing</a></body></html>"#),
    )
    .await;
    mount(&server, "/a", html(r#"<a href="/">Home</a><a href="/a#top">Self</a>"#)).await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.get(&page(&server, "/")).unwrap();
    assert_eq!(home.status_code(), Some(200));
    assert_eq!(home.error_code(), None);

    let a = frontier.get(&page(&server, "/a")).unwrap();
    assert_eq!(a.status_code(), Some(200));

    let missing = frontier.get(&page(&server, "/missing")).unwrap();
    assert_eq!(missing.error_code(), Some(ErrorCode::HttpError));
    assert_eq!(missing.status_code(), Some(404));

    // robots.txt is queued by the robots check and crawled like any page
    let robots = frontier.get(&page(&server, "/robots.txt")).unwrap();
    assert_eq!(robots.status_code(), Some(200));

    assert_eq!(frontier.len(), 4);
}

#[tokio::test]
async fn test_robots_disallow_blocks_fetch() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/robots.txt",
        robots("User-agent: *\nDisallow: /private"),
    )
    .await;
    mount(
        &server,
        "/",
        html(r#"<a href="/private/secret">S</a><a href="/public">P</a>"#),
    )
    .await;
    mount(&server, "/public", html("<p>hello</p>")).await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let secret = frontier.get(&page(&server, "/private/secret")).unwrap();
    assert_eq!(secret.error_code(), Some(ErrorCode::RobotsNotAllowed));
    assert_eq!(secret.status_code(), None);

    let public = frontier.get(&page(&server, "/public")).unwrap();
    assert_eq!(public.status_code(), Some(200));
}

#[tokio::test]
async fn test_robots_rules_match_agent_token() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/robots.txt",
        robots("User-agent: TestBot\nDisallow: /\n\nUser-agent: *\nAllow: /"),
    )
    .await;
    mount(&server, "/", html("<p>home</p>")).await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.get(&page(&server, "/")).unwrap();
    assert_eq!(home.error_code(), Some(ErrorCode::RobotsNotAllowed));
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    mount(&server, "/", html(r#"<a href="/next">next</a>"#)).await;
    mount(&server, "/next", html("<p>end</p>")).await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    crawler.run_until_exhausted().await.unwrap();

    assert_eq!(
        frontier.get(&page(&server, "/")).unwrap().status_code(),
        Some(200)
    );
    assert_eq!(
        frontier.get(&page(&server, "/next")).unwrap().status_code(),
        Some(200)
    );

    // The robots.txt URL itself was crawled and failed with the 404
    let robots = frontier.get(&page(&server, "/robots.txt")).unwrap();
    assert_eq!(robots.error_code(), Some(ErrorCode::HttpError));
}

#[tokio::test]
async fn test_server_error_on_robots_denies_origin() {
    let server = MockServer::start().await;
    mount(&server, "/robots.txt", ResponseTemplate::new(500)).await;
    mount(&server, "/", html("<p>home</p>")).await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.get(&page(&server, "/")).unwrap();
    assert_eq!(home.error_code(), Some(ErrorCode::RobotsNotAllowed));

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone())
        .robots_ignore_server_error(true)
        .build()
        .unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.get(&page(&server, "/")).unwrap();
    assert_eq!(home.status_code(), Some(200));
}

#[tokio::test]
async fn test_redirect_is_queued_not_followed() {
    let server = MockServer::start().await;
    mount(&server, "/robots.txt", robots("User-agent: *\nAllow: /")).await;
    mount(
        &server,
        "/old",
        ResponseTemplate::new(301).insert_header("Location", "/new"),
    )
    .await;
    mount(&server, "/new", html("<p>moved here</p>")).await;

    let frontier = seeded(&server, "/old").await;
    let crawler = fast_crawler(frontier.clone()).build().unwrap();
    let mut events = crawler.subscribe();
    crawler.run_until_exhausted().await.unwrap();

    let old = frontier.get(&page(&server, "/old")).unwrap();
    assert_eq!(old.status_code(), Some(301));
    assert_eq!(old.error_code(), None);

    let new = frontier.get(&page(&server, "/new")).unwrap();
    assert_eq!(new.status_code(), Some(200));

    assert!(drain(&mut events).contains(&CrawlEvent::Redirect {
        from: page(&server, "/old").to_string(),
        to: page(&server, "/new").to_string(),
    }));
}

#[tokio::test]
async fn test_handler_failure_is_recorded() {
    let server = MockServer::start().await;
    mount(&server, "/", html(r#"<a href="/never">never</a>"#)).await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone())
        .robots_enabled(false)
        .add_handler(
            "text/html",
            |_: &HandlerContext| -> anyhow::Result<Option<Vec<String>>> {
                anyhow::bail!("cannot parse page")
            },
        )
        .build()
        .unwrap();
    let mut events = crawler.subscribe();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.get(&page(&server, "/")).unwrap();
    assert_eq!(home.error_code(), Some(ErrorCode::HandlersError));
    assert_eq!(home.status_code(), Some(200));
    assert!(home.error_message().unwrap().contains("cannot parse page"));

    // Links found by the earlier handler were discarded with the failure
    assert!(frontier.get(&page(&server, "/never")).is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CrawlEvent::HandlersError { .. })));
}

#[tokio::test]
async fn test_requests_identify_the_crawler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header(
            "user-agent",
            "TestBot/1.0.0 (+https://example.com/contact; test@example.com)",
        ))
        .respond_with(html("<p>hi</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let frontier = seeded(&server, "/").await;
    let crawler = fast_crawler(frontier.clone())
        .robots_enabled(false)
        .build()
        .unwrap();
    crawler.run_until_exhausted().await.unwrap();

    assert_eq!(
        frontier.get(&page(&server, "/")).unwrap().status_code(),
        Some(200)
    );
}

#[tokio::test]
async fn test_relational_crawl_resumes_without_refetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/child">child</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/child"))
        .respond_with(html("<p>leaf</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");

    {
        let frontier = Arc::new(RelationalFrontier::open(&db, RetrySchedule::default()).unwrap());
        frontier.insert_if_not_exists(&page(&server, "/")).await.unwrap();
        let crawler = fast_crawler(frontier)
            .robots_enabled(false)
            .build()
            .unwrap();
        crawler.run_until_exhausted().await.unwrap();
    }

    let frontier = Arc::new(RelationalFrontier::open(&db, RetrySchedule::default()).unwrap());
    let stats = frontier.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.succeeded, 2);

    // Re-seeding and crawling again finds nothing eligible
    frontier.insert_if_not_exists(&page(&server, "/")).await.unwrap();
    let crawler = fast_crawler(frontier.clone())
        .robots_enabled(false)
        .build()
        .unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let home = frontier.entry(&page(&server, "/")).unwrap().unwrap();
    assert_eq!(home.url.status_code(), Some(200));
    assert_eq!(home.num_errors, 0);
}

#[tokio::test]
async fn test_shared_frontier_crawl_reaches_delayed_links() {
    let server = MockServer::start().await;
    let listing: String = (0..50)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    mount(&server, "/", html(&listing)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d+$"))
        .respond_with(html("<p>leaf</p>"))
        .expect(50)
        .mount(&server)
        .await;

    // Fresh admissions are scored a few milliseconds ahead per host
    let frontier = Arc::new(SharedFrontier::new(LocalStore::new()));
    frontier.insert_if_not_exists(&page(&server, "/")).await.unwrap();

    let crawler = fast_crawler(frontier.clone())
        .concurrency_limit(1)
        .robots_enabled(false)
        .build()
        .unwrap();
    crawler.run_until_exhausted().await.unwrap();

    let fetched = server.received_requests().await.unwrap().len();
    assert_eq!(fetched, 51);
    assert!(frontier.next_url().await.unwrap_err().is_exhausted());
}

#[tokio::test]
async fn test_gzip_sitemap_links_are_crawled() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let server = MockServer::start().await;
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:xhtml="http://www.w3.org/1999/xhtml">
  <url>
    <loc>{0}/en</loc>
    <xhtml:link rel="alternate" hreflang="de" href="{0}/de"/>
  </url>
</urlset>"#,
        server.uri()
    );
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    let archive = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/sitemap.xml.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive, "application/gzip"))
        .mount(&server)
        .await;
    mount(&server, "/en", html("<p>en</p>")).await;
    mount(&server, "/de", html("<p>de</p>")).await;

    let frontier = seeded(&server, "/sitemap.xml.gz").await;
    let crawler = fast_crawler(frontier.clone())
        .robots_enabled(false)
        .build()
        .unwrap();
    crawler.run_until_exhausted().await.unwrap();

    assert_eq!(
        frontier.get(&page(&server, "/en")).unwrap().status_code(),
        Some(200)
    );
    assert_eq!(
        frontier.get(&page(&server, "/de")).unwrap().status_code(),
        Some(200)
    );
}
