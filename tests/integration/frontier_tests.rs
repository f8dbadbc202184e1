//! Integration tests for the frontier backends
//!
//! These exercise the properties every backend must share: inserts are
//! idempotent, a claimed URL goes to exactly one claimer, and recorded
//! outcomes survive reopening where the backend persists.

use ripple_crawl::frontier::{
    LocalStore, RelationalFrontier, RetrySchedule, SharedFrontier,
};
use ripple_crawl::url::{CrawlUrl, ErrorCode};
use ripple_crawl::{Frontier, FrontierError, MemoryFrontier};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const URL_COUNT: usize = 60;
const CLAIMERS: usize = 8;

fn urls(count: usize) -> Vec<CrawlUrl> {
    (0..count)
        .map(|i| CrawlUrl::parse(&format!("https://host{}.example/page/{}", i % 7, i)).unwrap())
        .collect()
}

/// Claims from every frontier concurrently until all report exhaustion
async fn claim_all(frontiers: Vec<Arc<dyn Frontier>>) -> Vec<String> {
    let mut tasks = Vec::new();
    for i in 0..CLAIMERS {
        let frontier = frontiers[i % frontiers.len()].clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match frontier.next_url().await {
                    Ok(url) => claimed.push(url.to_string()),
                    Err(FrontierError::Exhausted) => return claimed,
                    Err(e) => panic!("claim failed: {}", e),
                }
            }
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    all
}

fn assert_each_claimed_once(claimed: &[String]) {
    let unique: HashSet<&String> = claimed.iter().collect();
    assert_eq!(unique.len(), claimed.len(), "a URL was claimed twice");
    assert_eq!(claimed.len(), URL_COUNT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_relational_claims_are_exclusive_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frontier.db");

    let seeding = RelationalFrontier::open(&path, RetrySchedule::default()).unwrap();
    seeding.insert_if_not_exists_bulk(&urls(URL_COUNT)).await.unwrap();

    let frontiers: Vec<Arc<dyn Frontier>> = (0..4)
        .map(|_| {
            Arc::new(RelationalFrontier::open(&path, RetrySchedule::default()).unwrap())
                as Arc<dyn Frontier>
        })
        .collect();

    let claimed = claim_all(frontiers).await;
    assert_each_claimed_once(&claimed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_claims_are_exclusive() {
    let frontier = Arc::new(SharedFrontier::new(LocalStore::new()));
    frontier.insert_if_not_exists_bulk(&urls(URL_COUNT)).await.unwrap();

    // Admission scores sit a few milliseconds in the future per host
    tokio::time::sleep(Duration::from_millis(200)).await;

    let claimed = claim_all(vec![frontier as Arc<dyn Frontier>]).await;
    assert_each_claimed_once(&claimed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_claims_are_exclusive() {
    let frontier = Arc::new(MemoryFrontier::new());
    frontier.insert_if_not_exists_bulk(&urls(URL_COUNT)).await.unwrap();

    let claimed = claim_all(vec![frontier as Arc<dyn Frontier>]).await;
    assert_each_claimed_once(&claimed);
}

#[tokio::test]
async fn test_duplicate_inserts_collapse() {
    let url = CrawlUrl::parse("https://example.com/a#frag").unwrap();
    let same = CrawlUrl::parse("https://example.com/a").unwrap();

    let frontiers: Vec<Arc<dyn Frontier>> = vec![
        Arc::new(MemoryFrontier::new()),
        Arc::new(RelationalFrontier::open_in_memory(RetrySchedule::default()).unwrap()),
    ];

    for frontier in frontiers {
        frontier.insert_if_not_exists(&url).await.unwrap();
        frontier.insert_if_not_exists(&same).await.unwrap();
        frontier
            .insert_if_not_exists_bulk(&[url.clone(), same.clone()])
            .await
            .unwrap();

        assert_eq!(frontier.next_url().await.unwrap(), same);
        assert!(frontier.next_url().await.unwrap_err().is_exhausted());
    }
}

#[tokio::test]
async fn test_outcomes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frontier.db");
    let ok = CrawlUrl::parse("https://example.com/ok").unwrap();
    let broken = CrawlUrl::parse("https://example.com/broken").unwrap();

    {
        let frontier = RelationalFrontier::open(&path, RetrySchedule::default()).unwrap();
        frontier.insert_if_not_exists_bulk(&[ok.clone(), broken.clone()]).await.unwrap();
        frontier.upsert(&ok.with_status(200)).await.unwrap();
        frontier
            .upsert(&broken.with_error(ErrorCode::HttpError, Some(500), "HTTP 500"))
            .await
            .unwrap();
    }

    let reopened = RelationalFrontier::open(&path, RetrySchedule::default()).unwrap();
    let stats = reopened.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.eligible_now, 0);

    let entry = reopened.entry(&broken).unwrap().unwrap();
    assert_eq!(entry.num_errors, 1);
    assert_eq!(entry.url.error_code(), Some(ErrorCode::HttpError));
    assert_eq!(entry.url.status_code(), Some(500));
    assert!(reopened.next_url().await.unwrap_err().is_exhausted());
}

#[tokio::test]
async fn test_retry_delay_grows_with_each_failure() {
    let frontier = RelationalFrontier::open_in_memory(RetrySchedule::default()).unwrap();
    let url = CrawlUrl::parse("https://example.com/flaky").unwrap();
    frontier.insert_if_not_exists(&url).await.unwrap();

    let mut previous = None;
    for attempt in 1..=5u32 {
        frontier
            .upsert(&url.with_error(ErrorCode::RequestError, None, "refused"))
            .await
            .unwrap();
        let entry = frontier.entry(&url).unwrap().unwrap();
        assert_eq!(entry.num_errors, attempt);
        if let Some(previous) = previous {
            assert!(entry.next_eligible_at > previous);
        }
        previous = Some(entry.next_eligible_at);
    }

    frontier.upsert(&url.with_status(200)).await.unwrap();
    assert_eq!(frontier.entry(&url).unwrap().unwrap().num_errors, 0);
}
