//! Database schema for the relational frontier

/// SQL schema for the frontier database
///
/// Times are Unix milliseconds. `hold_until` is the claim marker: a row whose
/// `hold_until` lies in the future is reserved by some worker.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_hash TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    status_code INTEGER,
    error_code TEXT,
    error_message TEXT,
    num_errors INTEGER NOT NULL DEFAULT 0,
    next_retry_at INTEGER NOT NULL,
    hold_until INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_urls_next_retry ON urls(next_retry_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
