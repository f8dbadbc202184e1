//! SQLite-backed frontier
//!
//! Several processes may open the same database file. Claims use an
//! optimistic compare-and-swap on the `hold_until` column: a worker reads the
//! soonest eligible row, then updates it only if nobody changed the marker in
//! between. A lost race simply retries. Under heavy contention this loop is
//! unbounded; SQLite's write lock keeps each attempt short.

mod schema;

use super::backoff::RetrySchedule;
use super::{datetime_from_ms, now_ms, until, Frontier, FrontierEntry, FrontierError, FrontierResult};
use crate::url::{CrawlUrl, ErrorCode};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use schema::initialize_schema;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const INSERT_IGNORE_SQL: &str = "INSERT OR IGNORE INTO urls
    (url_hash, url, status_code, error_code, error_message, num_errors, next_retry_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Row counts reported by [`RelationalFrontier::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub total: u64,
    pub pending: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub eligible_now: u64,
}

/// Frontier stored in a SQLite database
#[derive(Clone)]
pub struct RelationalFrontier {
    conn: Arc<Mutex<Connection>>,
    schedule: RetrySchedule,
}

struct ClaimCandidate {
    id: i64,
    hold_until: i64,
    url: String,
    status_code: Option<u16>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl RelationalFrontier {
    /// Opens (or creates) a frontier database
    pub fn open(path: &Path, schedule: RetrySchedule) -> FrontierResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schedule,
        })
    }

    /// Creates a frontier backed by a private in-memory database
    pub fn open_in_memory(schedule: RetrySchedule) -> FrontierResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schedule,
        })
    }

    fn lock(&self) -> FrontierResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| FrontierError::Poisoned)
    }

    /// Runs `work` on the blocking pool; the busy timeout can hold a thread
    /// for seconds while another process writes
    async fn blocking<T, F>(&self, work: F) -> FrontierResult<T>
    where
        F: FnOnce(&mut Connection) -> FrontierResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| FrontierError::Poisoned)?;
            work(&mut *guard)
        })
        .await?
    }

    /// Removes every entry
    pub fn reset(&self) -> FrontierResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM urls", [])?;
        debug!("Reset frontier, removed {} entries", removed);
        Ok(())
    }

    /// Counts entries by outcome
    pub fn stats(&self) -> FrontierResult<FrontierStats> {
        let conn = self.lock()?;
        let now = now_ms();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status_code IS NULL AND error_code IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status_code IS NOT NULL AND error_code IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN error_code IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN next_retry_at <= ?1 AND hold_until <= ?1 THEN 1 ELSE 0 END), 0)
             FROM urls",
            params![now],
            |row| {
                Ok(FrontierStats {
                    total: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                    succeeded: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                    eligible_now: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Returns the stored record and scheduling metadata of a URL
    pub fn entry(&self, url: &CrawlUrl) -> FrontierResult<Option<FrontierEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT url, status_code, error_code, error_message, num_errors, next_retry_at
                 FROM urls WHERE url_hash = ?1",
                params![url.url_hash()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<u16>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((address, status, code, message, num_errors, next_retry_at)) => {
                Ok(Some(FrontierEntry {
                    url: to_crawl_url(&address, status, code, message)?,
                    num_errors,
                    next_eligible_at: datetime_from_ms(next_retry_at),
                }))
            }
            None => Ok(None),
        }
    }
}

/// Scheduling for a URL that is new to the table
fn initial_row(schedule: &RetrySchedule, url: &CrawlUrl, now: i64) -> (u32, i64) {
    if url.is_failure() {
        (1, schedule.failure_schedule_ms(now, 1))
    } else {
        (0, schedule.first_schedule_ms(now))
    }
}

fn to_crawl_url(
    address: &str,
    status_code: Option<u16>,
    error_code: Option<String>,
    error_message: Option<String>,
) -> FrontierResult<CrawlUrl> {
    let error_code = error_code
        .map(|code| code.parse::<ErrorCode>())
        .transpose()?;
    Ok(CrawlUrl::from_parts(
        address,
        status_code,
        error_code,
        error_message,
    )?)
}

fn insert_params(
    stmt: &mut rusqlite::CachedStatement<'_>,
    schedule: &RetrySchedule,
    url: &CrawlUrl,
    now: i64,
) -> rusqlite::Result<usize> {
    let (num_errors, next_retry_at) = initial_row(schedule, url, now);
    stmt.execute(params![
        url.url_hash(),
        url.as_str(),
        url.status_code(),
        url.error_code().map(|c| c.as_str()),
        url.error_message(),
        num_errors,
        next_retry_at,
    ])
}

fn upsert_row(conn: &Connection, schedule: &RetrySchedule, url: &CrawlUrl) -> FrontierResult<()> {
    let now = now_ms();
    let url_hash = url.url_hash();

    let (num_errors, next_retry_at) = if url.is_failure() {
        // Only failures need the previous count
        let previous: Option<u32> = conn
            .query_row(
                "SELECT num_errors FROM urls WHERE url_hash = ?1",
                params![url_hash],
                |row| row.get(0),
            )
            .optional()?;
        let num_errors = previous.unwrap_or(0).saturating_add(1);
        (num_errors, schedule.failure_schedule_ms(now, num_errors))
    } else if url.status_code().is_some() {
        (0, schedule.success_schedule_ms(now))
    } else {
        (0, schedule.first_schedule_ms(now))
    };

    conn.execute(
        "INSERT INTO urls
            (url_hash, url, status_code, error_code, error_message, num_errors, next_retry_at, hold_until)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(url_hash) DO UPDATE SET
            url = excluded.url,
            status_code = excluded.status_code,
            error_code = excluded.error_code,
            error_message = excluded.error_message,
            num_errors = excluded.num_errors,
            next_retry_at = excluded.next_retry_at,
            hold_until = 0",
        params![
            url_hash,
            url.as_str(),
            url.status_code(),
            url.error_code().map(|c| c.as_str()),
            url.error_message(),
            num_errors,
            next_retry_at,
        ],
    )?;
    Ok(())
}

fn claim_row(conn: &Connection, schedule: &RetrySchedule) -> FrontierResult<CrawlUrl> {
    loop {
        let now = now_ms();
        let candidate = conn
            .query_row(
                "SELECT id, hold_until, url, status_code, error_code, error_message
                 FROM urls
                 WHERE next_retry_at <= ?1 AND hold_until <= ?1
                 ORDER BY next_retry_at
                 LIMIT 1",
                params![now],
                |row| {
                    Ok(ClaimCandidate {
                        id: row.get(0)?,
                        hold_until: row.get(1)?,
                        url: row.get(2)?,
                        status_code: row.get(3)?,
                        error_code: row.get(4)?,
                        error_message: row.get(5)?,
                    })
                },
            )
            .optional()?;

        let candidate = match candidate {
            Some(candidate) => candidate,
            None => return Err(FrontierError::Exhausted),
        };

        let claimed = conn.execute(
            "UPDATE urls SET hold_until = ?1
             WHERE id = ?2 AND hold_until = ?3 AND next_retry_at <= ?4",
            params![
                schedule.claim_until_ms(now),
                candidate.id,
                candidate.hold_until,
                now
            ],
        )?;

        if claimed == 0 {
            trace!("Lost claim race for {}, retrying", candidate.url);
            continue;
        }

        return to_crawl_url(
            &candidate.url,
            candidate.status_code,
            candidate.error_code,
            candidate.error_message,
        );
    }
}

#[async_trait]
impl Frontier for RelationalFrontier {
    async fn insert_if_not_exists(&self, url: &CrawlUrl) -> FrontierResult<()> {
        self.insert_if_not_exists_bulk(std::slice::from_ref(url)).await
    }

    async fn insert_if_not_exists_bulk(&self, urls: &[CrawlUrl]) -> FrontierResult<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let schedule = self.schedule;
        let urls = urls.to_vec();
        self.blocking(move |conn| {
            let now = now_ms();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(INSERT_IGNORE_SQL)?;
                for url in &urls {
                    insert_params(&mut stmt, &schedule, url, now)?;
                }
            }
            tx.commit()?;
            trace!("Bulk inserted {} urls", urls.len());
            Ok(())
        })
        .await
    }

    async fn upsert(&self, url: &CrawlUrl) -> FrontierResult<()> {
        let schedule = self.schedule;
        let url = url.clone();
        self.blocking(move |conn| upsert_row(conn, &schedule, &url)).await
    }

    async fn next_url(&self) -> FrontierResult<CrawlUrl> {
        let schedule = self.schedule;
        self.blocking(move |conn| claim_row(conn, &schedule)).await
    }

    async fn next_due_in(&self) -> FrontierResult<Option<Duration>> {
        self.blocking(|conn| {
            let soonest: Option<i64> = conn.query_row(
                "SELECT MIN(MAX(next_retry_at, hold_until)) FROM urls",
                [],
                |row| row.get(0),
            )?;
            Ok(soonest.map(|at| until(at, now_ms())))
        })
        .await
    }
}
